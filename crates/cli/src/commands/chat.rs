//! `agentloop chat`: Run one turn against the configured provider.

use super::runtime;
use agentloop_agent::AgentStreamEvent;
use agentloop_config::AppConfig;
use std::io::Write;

pub async fn run(
    config: AppConfig,
    conversation_id: &str,
    message: &str,
    stream: bool,
) -> anyhow::Result<()> {
    let runtime = runtime::build(&config).await?;
    let orchestrator = runtime.orchestrator;

    if !stream {
        let answer = orchestrator.chat(conversation_id, message).await?;
        println!("{}", answer.content);
        return Ok(());
    }

    let mut rx = orchestrator.stream(conversation_id, message).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { message } => {
                if let Some(reasoning) = message.reasoning() {
                    eprint!("{reasoning}");
                }
                print!("{}", message.content);
                stdout.flush()?;
            }
            AgentStreamEvent::ToolResult { message } => {
                println!();
                for response in &message.tool_responses {
                    println!("   [{}] {}", response.name, response.response_data);
                }
            }
            AgentStreamEvent::Done { iterations, .. } => {
                println!();
                eprintln!("   ({iterations} model calls)");
            }
            AgentStreamEvent::IterationCapped { message, iterations } => {
                println!();
                println!("{}", message.content);
                eprintln!("   (stopped after {iterations} model calls)");
            }
            AgentStreamEvent::Error { message } => {
                anyhow::bail!("stream failed: {message}");
            }
        }
    }
    Ok(())
}
