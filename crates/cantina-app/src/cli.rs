use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use cantina_core::payloads::EventPayload;
use cantina_core::{EventBus, EventTopic};
use cantina_runtime::CommandDispatcherService;

const PROMPT: &str = "DJ-R3X> ";

fn print_prompt() {
    print!("{PROMPT}");
    let _ = std::io::stdout().flush();
}

/// Terminal surface: banner, prompt, one dispatched command per line and
/// response printing with severity prefixes.
pub struct CliSurface {
    dispatcher: Arc<CommandDispatcherService>,
    bus: EventBus,
}

impl CliSurface {
    pub fn new(dispatcher: Arc<CommandDispatcherService>, bus: EventBus) -> Self {
        Self { dispatcher, bus }
    }

    /// Print responses as they arrive, then restore the prompt.
    pub fn attach_response_printer(&self) {
        let _sub = self.bus.subscribe(
            EventTopic::CliResponse,
            "cli_surface",
            move |event| async move {
                if let EventPayload::CliResponse { message, is_error } = &event.payload {
                    if *is_error {
                        eprintln!("[ERROR] {message}");
                    } else {
                        println!("{message}");
                    }
                    print_prompt();
                }
                Ok(())
            },
        );
    }

    /// Read stdin until shutdown is signalled or the stream closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        println!("\nDJ R3X Voice Control CLI");
        println!("Type 'help' for available commands\n");
        print_prompt();

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            self.dispatcher.dispatch_line(&line);
                            let trimmed = line.trim().to_lowercase();
                            if matches!(trimmed.as_str(), "q" | "quit" | "exit") {
                                break;
                            }
                            print_prompt();
                        }
                        Ok(None) | Err(_) => {
                            // EOF on stdin behaves like quit.
                            self.dispatcher.dispatch_line("quit");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
