use clap::{Parser, Subcommand};
use config::ServeArgs;

#[derive(Debug, Parser)]
#[command(name = "chatgpt-local", about = "Local OpenAI/Anthropic/Ollama-compatible proxy in front of the ChatGPT Responses API")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Persists already-obtained upstream credentials.
    Login {
        #[arg(long, env = "CHATGPT_LOCAL_ID_TOKEN")]
        id_token: String,

        #[arg(long, env = "CHATGPT_LOCAL_ACCESS_TOKEN_VALUE")]
        access_token: String,

        #[arg(long, env = "CHATGPT_LOCAL_REFRESH_TOKEN")]
        refresh_token: String,

        #[arg(long, env = "CHATGPT_LOCAL_ACCOUNT_ID")]
        account_id: String,
    },

    /// Starts the proxy server.
    Serve(ServeArgs),

    /// Prints the last observed rate-limit snapshot.
    Info,
}
