use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use assistant_core::{
    AssistantConfig, BridgeCommand, ChatIndex, ConversationId, PromptTemplate, TiktokenProvider,
    TokenAccountant,
};
use assistant_llm::OpenAIProvider;
use assistant_loop::{Dispatcher, Orchestrator, OrchestratorConfig};

mod logging;
mod terminal;

use logging::init_logging;
use terminal::{TerminalBridge, TerminalEditor};

#[derive(Parser, Debug, Clone)]
#[command(name = "code-assistant")]
#[command(about = "Chat with an OpenAI-compatible model about your code")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// API key (overrides the configuration file)
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API base URL
    #[arg(long, env = "API_BASE")]
    api_base: Option<String>,

    /// Default chat model
    #[arg(long, env = "MODEL")]
    model: Option<String>,

    /// Minimum interval between streamed panel updates
    #[arg(long, env = "CHAT_THROTTLE_MS")]
    throttle_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut AssistantConfig) {
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(api_base) = &self.api_base {
            config.api_base = Some(api_base.clone());
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(throttle_ms) = self.throttle_ms {
            config.throttle_ms = throttle_ms;
        }
    }
}

const HELP: &str = "\
Type a message to send it to the current conversation.
  /new               open a conversation in a new slot
  /chat <id>         switch to a conversation
  /close             close the current conversation
  /clear             start the current conversation over
  /stop              stop the answer being generated
  /continue          finish an answer cut off inside a code block
  /refresh           redraw the current conversation
  /tokens [text]     estimate the tokens a message would use
  /export            print the conversation as markdown
  /attach <file>     send a file along with each message
  /detach            stop sending the attached file
  /prompts           list configured prompt commands
  /run <n>           run prompt command <n> on the attached file
  /action <id> <prompt>  run a one-off prompt outside any conversation
  /stop-action <id>  cancel a running action
  /quit              exit";

#[derive(Debug, PartialEq)]
enum Input {
    Empty,
    Quit,
    Help,
    Prompts,
    Template(usize),
    Attach(PathBuf),
    Detach,
    Command(BridgeCommand),
    Unknown(String),
}

fn parse_input(line: &str, current: ConversationId) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return Input::Command(BridgeCommand::SendMessage {
            conversation_id: current,
            chat_id: ChatIndex::new_message(),
            message: line.to_string(),
            include_editor_selection: true,
            verbosity: None,
            model: None,
        });
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match (name, rest) {
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        ("prompts", _) => Input::Prompts,
        ("detach", _) => Input::Detach,
        ("attach", path) if !path.is_empty() => Input::Attach(PathBuf::from(path)),
        ("run", n) => match n.parse() {
            Ok(n) => Input::Template(n),
            Err(_) => Input::Unknown(line.to_string()),
        },
        ("new", _) => Input::Command(BridgeCommand::NewChat),
        ("close", _) => Input::Command(BridgeCommand::CloseChat),
        ("clear", _) => Input::Command(BridgeCommand::ClearChat),
        ("refresh", _) => Input::Command(BridgeCommand::RefreshChat),
        ("chat", id) => match id.parse() {
            Ok(id) => Input::Command(BridgeCommand::SetChat {
                conversation_id: ConversationId::new(id),
            }),
            Err(_) => Input::Unknown(line.to_string()),
        },
        ("stop", _) => Input::Command(BridgeCommand::StopGenerating {
            conversation_id: current,
        }),
        ("continue", _) => Input::Command(BridgeCommand::ContinueConversation {
            conversation_id: current,
        }),
        ("tokens", text) => Input::Command(BridgeCommand::GetTokenCount {
            conversation_id: current,
            user_input: text.to_string(),
            use_editor_selection: true,
        }),
        ("export", _) => Input::Command(BridgeCommand::ExportToMarkdown {
            conversation_id: current,
        }),
        ("action", args) => match args.split_once(char::is_whitespace) {
            Some((action_id, prompt)) if !prompt.trim().is_empty() => {
                Input::Command(BridgeCommand::RunAction {
                    action_id: action_id.to_string(),
                    prompt: prompt.trim().to_string(),
                })
            }
            _ => Input::Unknown(line.to_string()),
        },
        ("stop-action", action_id) if !action_id.is_empty() => {
            Input::Command(BridgeCommand::StopAction {
                action_id: action_id.to_string(),
            })
        }
        _ => Input::Unknown(line.to_string()),
    }
}

/// Commands whose failures already reach the terminal as panel events.
fn reports_own_errors(command: &BridgeCommand) -> bool {
    matches!(
        command,
        BridgeCommand::SendMessage { .. }
            | BridgeCommand::ContinueConversation { .. }
            | BridgeCommand::RunAction { .. }
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = AssistantConfig::new();
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;
    let templates = config.prompt_templates()?;

    log::info!("Model: {}", config.model);
    log::info!(
        "Base URL: {}",
        config.api_base.as_deref().unwrap_or("default")
    );
    log::debug!("Throttle: {}ms", config.throttle_ms);

    let provider = OpenAIProvider::from_config(&config)
        .context("set API_KEY or api_key in the configuration file")?;
    let bridge = Arc::new(TerminalBridge::new());
    let editor = Arc::new(TerminalEditor::new());
    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        bridge.clone(),
        OrchestratorConfig::from(&config),
    );
    let accountant = TokenAccountant::new(Arc::new(TiktokenProvider), config.model.clone());
    let dispatcher = Dispatcher::new(orchestrator, editor.clone(), accountant, bridge);

    println!("Type /help for commands.");
    run_repl(dispatcher, editor, templates).await
}

async fn run_repl(
    dispatcher: Dispatcher,
    editor: Arc<TerminalEditor>,
    templates: Vec<PromptTemplate>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let current = dispatcher.orchestrator().current();

        match parse_input(&line, current) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{}", HELP),
            Input::Prompts => {
                for (n, template) in templates.iter().enumerate() {
                    let inline = if template.inline { " (inline)" } else { "" };
                    println!("{:>3}  {}{}: {}", n, template.title, inline, template.prompt);
                }
            }
            Input::Template(n) => match templates.get(n).cloned() {
                Some(template) => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(err) = dispatcher.run_template(&template).await {
                            println!("error: {}", err);
                        }
                    });
                }
                None => println!("no prompt command {}", n),
            },
            Input::Attach(path) => match editor.attach(&path) {
                Ok(len) => println!("attached {} ({} bytes)", path.display(), len),
                Err(err) => println!("cannot attach {}: {}", path.display(), err),
            },
            Input::Detach => editor.detach(),
            Input::Command(command) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let quiet = reports_own_errors(&command);
                    if let Err(err) = dispatcher.handle(command).await {
                        if quiet {
                            log::debug!("Command failed: {}", err);
                        } else {
                            println!("error: {}", err);
                        }
                    }
                });
            }
            Input::Unknown(line) => println!("unknown command: {} (try /help)", line),
        }
    }

    Ok(())
}
