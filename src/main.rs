use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use pricecast::AppCommand;
use pricecast::core::log::init_logging;
use pricecast::core::models::{AlertCondition, DEFAULT_GRADE};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Sign in with email and password
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Complete a social login from its redirect URL
    OauthCallback { url: String },
    /// Display current prices for every grade
    Prices,
    /// Display price history of one or more grades side by side
    Chart {
        /// Grades to compare; defaults to the configured ones
        grades: Vec<String>,
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Display the price forecast of a grade
    Forecast {
        #[arg(default_value = DEFAULT_GRADE)]
        grade: String,
    },
    /// Display stored predictions of a grade
    Predictions {
        #[arg(default_value = DEFAULT_GRADE)]
        grade: String,
        /// Regenerate predictions first
        #[arg(long)]
        refresh: bool,
    },
    /// Manage price alerts
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
    /// Display the market data snapshot
    Market {
        /// Snapshot date (YYYY-MM-DD); latest when omitted
        date: Option<String>,
    },
    /// Display factors driving the price of a grade
    Factors {
        #[arg(default_value = DEFAULT_GRADE)]
        grade: String,
    },
    /// Display forecast model performance of a grade
    Model {
        #[arg(default_value = DEFAULT_GRADE)]
        grade: String,
    },
}

#[derive(Subcommand)]
enum AlertCommands {
    /// List alerts
    List {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an alert
    Create {
        grade: String,
        /// above or below
        condition: AlertCondition,
        threshold: f64,
        #[arg(long)]
        email: Option<String>,
    },
    /// Delete an alert
    Delete { id: i64 },
}

impl From<Commands> for AppCommand {
    fn from(cmd: Commands) -> AppCommand {
        match cmd {
            Commands::Login { email, password } => AppCommand::Login { email, password },
            Commands::Register {
                email,
                name,
                password,
            } => AppCommand::Register {
                email,
                password,
                name,
            },
            Commands::Logout => AppCommand::Logout,
            Commands::Whoami => AppCommand::Whoami,
            Commands::OauthCallback { url } => AppCommand::OAuthCallback { url },
            Commands::Prices => AppCommand::Prices,
            Commands::Chart { grades, days } => AppCommand::Chart { grades, days },
            Commands::Forecast { grade } => AppCommand::Forecast { grade },
            Commands::Predictions { grade, refresh } => AppCommand::Predictions { grade, refresh },
            Commands::Alerts { command } => match command {
                AlertCommands::List { email } => AppCommand::AlertsList { email },
                AlertCommands::Create {
                    grade,
                    condition,
                    threshold,
                    email,
                } => AppCommand::AlertsCreate {
                    grade,
                    condition,
                    threshold,
                    email,
                },
                AlertCommands::Delete { id } => AppCommand::AlertsDelete { id },
            },
            Commands::Market { date } => AppCommand::Market { date },
            Commands::Factors { grade } => AppCommand::Factors { grade },
            Commands::Model { grade } => AppCommand::Model { grade },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => pricecast::cli::setup::setup(),
        Some(cmd) => pricecast::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
