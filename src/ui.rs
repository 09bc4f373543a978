//! Interface de terminal do slicer-jobs: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente um job
//! consultando o status publicado pelos workers.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::AppConfig;
use crate::store::JobStatusView;

/// Indicador visual de progresso para um job no terminal.
///
/// Exibe um spinner enquanto o job não termina e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e nova tentativa (amarelo).
pub struct JobProgress {
    pb: ProgressBar,
    label: String,
    // Última tentativa vista, para anunciar retentativas uma única vez.
    last_attempt: u32,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner para o modelo indicado.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{label}: PENDING"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            label: label.to_string(),
            last_attempt: 0,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner com o estado e o progresso atuais.
    pub fn update(&mut self, view: &JobStatusView) {
        if view.attempt > self.last_attempt && !view.is_terminal() {
            self.pb.println(format!(
                "  {} {}: retry, attempt {}",
                self.yellow.apply_to("↻"),
                self.label,
                view.attempt + 1
            ));
        }
        self.last_attempt = view.attempt;
        self.pb
            .set_message(format!("{}: {} {}%", self.label, view.state, view.progress));
    }

    /// Finaliza o spinner e exibe o resultado do job.
    pub fn complete(&self, view: &JobStatusView) {
        self.pb.finish_and_clear();
        if let Some(result) = &view.result {
            println!(
                "  {} {}: {} | {:.2} g | {:.2}",
                self.green.apply_to("✓"),
                self.label,
                result.print_time,
                result.material_grams,
                result.cost
            );
        } else if let Some(error) = &view.error {
            println!(
                "  {} {}: [{}] {}",
                self.red.apply_to("✗"),
                self.label,
                error.code,
                error.message
            );
        }
    }
}

/// Imprime o status final em JSON.
pub fn print_status(view: &JobStatusView) {
    println!("{}", serde_json::to_string_pretty(view).unwrap_or_default());
}

/// Imprime a impressora e os materiais configurados em JSON.
pub fn print_specs(config: &AppConfig) {
    let specs = serde_json::json!({
        "printer": config.printer,
        "materials": config.materials.keys().collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&specs).unwrap_or_default());
}
