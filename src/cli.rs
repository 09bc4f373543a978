//! Interface de linha de comando do slicer-jobs baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (calculate, check, specs)
//! e flags globais (--config, --max-attempts, --workers, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Orçamentos de impressão 3D: valida, fatia e estima tempo, filamento e custo.
#[derive(Debug, Parser)]
#[command(name = "slicer-jobs", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (padrão: slicer.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de tentativas por job.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Quantidade de workers consumindo a fila.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calcula o orçamento de um ou mais modelos STL.
    Calculate {
        /// Arquivos STL a processar.
        #[arg(required = true)]
        models: Vec<PathBuf>,

        /// Material de impressão (PLA ou ABS).
        #[arg(long, default_value = "PLA")]
        material: String,

        /// Preenchimento em porcentagem (0 a 100).
        #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
        infill: i64,
    },

    /// Verifica se o PrusaSlicer está disponível.
    Check,

    /// Mostra as especificações da impressora e os materiais configurados.
    Specs,
}
