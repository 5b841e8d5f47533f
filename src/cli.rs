//! Interface de linha de comando do scriptorium baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, stream, estimate)
//! e flags globais (--config, --max-retries, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// scriptorium: geração resiliente de documentos longos sobre provedores de LLM.
#[derive(Debug, Parser)]
#[command(name = "scriptorium", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./scriptorium.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Sobrescreve o número máximo de retentativas por modelo.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gera o documento publicando o progresso para os assinantes do dono.
    Run {
        /// Arquivo de requisição (TOML ou JSON).
        #[arg(long)]
        file: PathBuf,

        /// Imprime cada evento como uma linha JSON em vez da barra de progresso.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Gera o documento como um único fluxo ordenado de eventos JSON.
    Stream {
        /// Arquivo de requisição (TOML ou JSON).
        #[arg(long)]
        file: PathBuf,
    },

    /// Estima tokens e custo sem chamar nenhum provedor.
    Estimate {
        /// Arquivo de requisição (TOML ou JSON).
        #[arg(long)]
        file: PathBuf,
    },
}
