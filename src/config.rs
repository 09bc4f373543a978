//! Configuração carregada a partir de `slicer.toml`.
//!
//! A struct [`AppConfig`] contém todos os parâmetros configuráveis: perfil da
//! impressora, caminho do slicer, perfis de material, política de retentativa
//! e parâmetros dos workers. Valores não presentes no arquivo usam defaults.
//! A variável de ambiente `PRUSA_SLICER_PATH` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::profile::{BuildVolume, Material, MaterialProfiles, default_material_profiles};
use crate::slicer::locate::OVERRIDE_ENV;
use crate::state_machine::RetryConfig;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "slicer.toml";

/// Configuração de nível superior. Imutável depois de carregada.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Perfil da impressora (volume de construção, bico, altura de camada).
    #[serde(default)]
    pub printer: BuildVolume,

    #[serde(default)]
    pub slicer: SlicerSettings,

    /// Arquivo de configuração do slicer para cada material.
    #[serde(default = "default_material_profiles")]
    pub materials: MaterialProfiles,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub worker: WorkerSettings,
}

/// Como localizar e executar o slicer externo.
#[derive(Debug, Clone, Deserialize)]
pub struct SlicerSettings {
    /// Caminho explícito do executável.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Configuração fixa da impressora passada com `--load`.
    #[serde(default = "default_printer_config")]
    pub printer_config: PathBuf,

    /// Tempo máximo de uma execução, em segundos.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Limite de bytes de diagnóstico capturados de cada stream.
    #[serde(default = "default_max_diagnostic_bytes")]
    pub max_diagnostic_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Número de workers executando jobs em paralelo.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Diretório onde as áreas de trabalho temporárias são criadas.
    /// Usa o diretório temporário do sistema quando ausente.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Tamanho máximo aceito para um modelo enviado.
    #[serde(default = "default_max_model_bytes")]
    pub max_model_bytes: usize,
}

// Valor padrão: "configs/config.ini".
fn default_printer_config() -> PathBuf {
    PathBuf::from("configs/config.ini")
}

// Valor padrão: 30 minutos.
fn default_timeout_secs() -> u64 {
    1800
}

// Valor padrão: 64 KiB.
fn default_max_diagnostic_bytes() -> usize {
    64 * 1024
}

// Valor padrão: 2 workers.
fn default_concurrency() -> usize {
    2
}

// Valor padrão: 10 MiB.
fn default_max_model_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            printer: BuildVolume::default(),
            slicer: SlicerSettings::default(),
            materials: default_material_profiles(),
            retry: RetryConfig::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for SlicerSettings {
    fn default() -> Self {
        Self {
            executable: None,
            printer_config: default_printer_config(),
            timeout_secs: default_timeout_secs(),
            max_diagnostic_bytes: default_max_diagnostic_bytes(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            work_dir: None,
            max_model_bytes: default_max_model_bytes(),
        }
    }
}

impl AppConfig {
    /// Carrega `slicer.toml` do diretório atual, ou os defaults se ele não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Carrega a configuração de `path`. Um arquivo ausente não é erro.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o executável.
        if let Ok(exe) = std::env::var(OVERRIDE_ENV) {
            if !exe.is_empty() {
                config.slicer.executable = Some(PathBuf::from(exe));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Longest a single job can legitimately take: every attempt running to
    /// the slicer timeout, the backoff between attempts, plus a minute of slack.
    pub fn job_deadline(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        let slicing = Duration::from_secs(self.slicer.timeout_secs).saturating_mul(attempts);
        let backoff = (1..attempts)
            .map(|n| self.retry.delay_for_attempt(n))
            .fold(Duration::ZERO, Duration::saturating_add);
        slicing
            .saturating_add(backoff)
            .saturating_add(Duration::from_secs(60))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str::<AppConfig>(contents)?)
    }

    /// Rejeita combinações que impediriam qualquer job de terminar.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.worker.concurrency == 0 {
            bail!("worker.concurrency must be at least 1");
        }
        if self.slicer.timeout_secs == 0 {
            bail!("slicer.timeout_secs must be positive");
        }
        for material in Material::ALL {
            if !self.materials.contains_key(&material) {
                bail!("no profile configured for material {material}");
            }
        }
        if self.printer.bed_size.iter().any(|d| *d <= 0.0) {
            bail!("printer.bed_size must be positive on every axis");
        }
        Ok(())
    }
}
