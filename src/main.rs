//! pulmo CLI: neuro-symbolic respiratory query router.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use pulmo_nesy::config::PulmoConfig;
use pulmo_nesy::interpret::collect_evidence;
use pulmo_nesy::kb::ClearOutcome;
use pulmo_nesy::paths::PulmoPaths;
use pulmo_nesy::reason::ReasoningOrchestrator;
use pulmo_nesy::router::Router;
use pulmo_nesy::translate::{QueryDescriptor, ReasoningMode, Subject, SUPPORTED_TARGETS};

#[derive(Parser)]
#[command(name = "pulmo", version, about = "Neuro-symbolic respiratory query router")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/pulmo-nesy/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the persisted custom fact set (omit for memory-only).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Ollama base URL.
    #[arg(long, global = true)]
    ollama_url: Option<String>,

    /// Ollama model name.
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route one query (or fact command) and print the answer.
    Ask {
        /// The query, e.g. "Who is diagnosed with copd?" or "add facts > ...".
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Interactive loop; `exit` or `quit` leaves.
    Repl,

    /// List the facts of the active knowledge base.
    Facts,

    /// List the rule set.
    Rules,

    /// Run the reasoning engine directly, without the oracle.
    Prove {
        /// Supported disease or treatment, e.g. copd.
        object: String,

        /// Patient to prove for (default: any patient).
        #[arg(long)]
        subject: Option<String>,

        /// Derive all consequences of assuming the goal instead of proving it.
        #[arg(long)]
        derive: bool,
    },

    /// Delete the custom fact set and return to the default facts.
    Clear,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ask { query } => {
            let router = Router::from_config(&config)?;
            let query = query.join(" ");
            match router.handle(&query) {
                Ok(response) => println!("[{}] {}", response.source, response.text),
                Err(e) => {
                    println!("{}", e.user_message());
                    return Err(e.into());
                }
            }
        }

        Commands::Repl => {
            let router = Router::from_config(&config)?;
            run_repl(&router)?;
        }

        Commands::Facts => {
            let manager = config.open_knowledge_base()?;
            let kb = manager.active();
            println!(
                "Knowledge base: generation {}, {} facts ({})",
                kb.generation(),
                kb.facts().len(),
                kb.origin()
            );
            for fact in kb.facts() {
                println!("  {fact}");
            }
        }

        Commands::Rules => {
            let manager = config.open_knowledge_base()?;
            let rules = &manager.sources().rules;
            println!("Rules ({}):", rules.len());
            for rule in rules.iter() {
                println!("  {rule}");
            }
        }

        Commands::Prove {
            object,
            subject,
            derive,
        } => {
            let subject = subject.map_or(Subject::Unbound, Subject::Bound);
            let mode = if derive && subject.is_bound() {
                ReasoningMode::DeriveAll
            } else {
                ReasoningMode::ProveSpecific
            };
            let Some(descriptor) = QueryDescriptor::for_object(&object, subject, mode) else {
                let supported: Vec<_> = SUPPORTED_TARGETS.iter().map(|t| t.object).collect();
                miette::bail!(
                    "\"{object}\" is not a supported disease or treatment. Supported: {}",
                    supported.join(", ")
                );
            };
            if derive && mode == ReasoningMode::ProveSpecific {
                eprintln!("--derive needs --subject; falling back to proof search");
            }

            let manager = config.open_knowledge_base()?;
            let snapshot = manager.snapshot();
            let traces = ReasoningOrchestrator::new().run(&descriptor, &snapshot)?;
            println!("{descriptor} (depth {}): {} trace(s)", descriptor.depth, traces.len());
            for trace in &traces {
                let tag = if trace.is_hypothetical() { " (assumed)" } else { "" };
                println!("  {}{tag}", trace.conclusion);
                for step in trace.steps() {
                    let cited: Vec<_> = step.cited_facts.iter().map(|id| id.as_str()).collect();
                    println!("    {} [{}] => {}", step.rule, cited.join(", "), step.conclusion);
                }
            }
            let collected = collect_evidence(&traces, snapshot.kb());
            for group in &collected.evidence {
                println!("{}:", group.category.heading());
                for fact in &group.facts {
                    println!("  {}: {}", fact.id, fact.to_atom());
                }
            }
            if !collected.rules.is_empty() {
                println!("Rules applied: {}", collected.rules.join(", "));
            }
        }

        Commands::Clear => {
            let manager = config.open_knowledge_base()?;
            match manager.clear()? {
                ClearOutcome::Cleared { removed } => {
                    println!("Cleared {removed} custom facts. Default knowledge base loaded.")
                }
                ClearOutcome::NothingToClear => {
                    println!("No custom facts to clear. Default knowledge base is already loaded.")
                }
            }
        }
    }

    Ok(())
}

/// Resolve the config file, then apply command-line overrides.
fn load_config(cli: &Cli) -> Result<PulmoConfig> {
    let mut config = match &cli.config {
        Some(path) => PulmoConfig::load(path)?,
        None => match PulmoPaths::resolve() {
            Ok(paths) => PulmoConfig::load_or_default(&paths.config_file())?,
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve config directory, using defaults");
                PulmoConfig::default()
            }
        },
    };
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = Some(dir.clone());
    }
    if let Some(url) = &cli.ollama_url {
        config.oracle.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(model) = &cli.model {
        config.oracle.model = model.clone();
    }
    Ok(config)
}

fn run_repl(router: &Router) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    println!("pulmo repl. Ask a question, `add facts > ...`, `add new facts > ...`, `clear facts`, or `exit`.");
    loop {
        print!("> ");
        stdout.flush().into_diagnostic()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).into_diagnostic()? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        match router.handle(line) {
            Ok(response) => println!("[{}] {}\n", response.source, response.text),
            Err(e) => {
                tracing::error!(error = ?e, "query failed");
                println!("{}\n", e.user_message());
            }
        }
    }
    Ok(())
}
