//! Command execution.

use crate::Commands;
use colored::Colorize;
use durafsm_client::Client;
use durafsm_core::MachineDefinition;
use durafsm_server::bootstrap::read_definition;
use durafsm_server::TokenValidator;
use serde_json::{json, Value};

/// Executes a command against the server and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Health => {
            client.health().await?;
            Ok(format!("{} {}", "OK".green(), client.base_url()))
        }

        Commands::Create { id } => {
            let created = client.create(id.as_deref()).await?;
            Ok(format!(
                "{} instance {} in state {}",
                "Created".green(),
                created.id.cyan(),
                created.state.yellow()
            ))
        }

        Commands::Transition {
            id,
            trigger,
            payload,
        } => {
            let payload = match payload {
                Some(ref arg) => parse_json_arg(arg)?,
                None => json!({}),
            };
            client.transition(&id, &trigger, &payload).await?;
            let record = client.describe(&id).await?;
            Ok(format!(
                "{} {} on {} -> {}",
                "Fired".green(),
                trigger.cyan(),
                id.cyan(),
                record.state.yellow()
            ))
        }

        Commands::Describe { id } => {
            let record = client.describe(&id).await?;
            Ok(format_json(&serde_json::to_value(&record)?))
        }

        Commands::HashToken { .. } | Commands::CheckMachine { .. } => execute_local(cmd),
    }
}

/// Executes a command that needs no server.
pub fn execute_local(cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::HashToken { token } => {
            let hash = TokenValidator::hash_token(&token);
            Ok(format!(
                "{}\n\n{}:\n  token_hashes:\n    - \"{}\"",
                hash,
                "Add to config".dimmed(),
                hash
            ))
        }

        Commands::CheckMachine { file } => {
            let definition = read_definition(&file)?;
            Ok(format_definition(&definition))
        }

        _ => Err("command requires a server".into()),
    }
}

/// Summarizes a machine: states with their tasks, then transitions.
fn format_definition(definition: &MachineDefinition) -> String {
    let mut output = format!(
        "{} machine {} ({} states, {} transitions)\n",
        "Valid".green(),
        definition.name().cyan(),
        definition.states().len(),
        definition.transitions().len()
    );

    output.push_str(&format!("\n{}\n", "States:".bold()));
    for state in definition.states() {
        let marker = if state.name == definition.initial().name {
            " (initial)".dimmed().to_string()
        } else {
            String::new()
        };
        output.push_str(&format!("  {}{}\n", state.name.yellow(), marker));
        if !state.on_entry.is_empty() {
            output.push_str(&format!("    entry: {}\n", state.on_entry.join(", ")));
        }
        if !state.on_exit.is_empty() {
            output.push_str(&format!("    exit:  {}\n", state.on_exit.join(", ")));
        }
    }

    output.push_str(&format!("\n{}\n", "Transitions:".bold()));
    for transition in definition.transitions() {
        output.push_str(&format!(
            "  {} --{}--> {}",
            transition.source,
            transition.trigger.cyan(),
            transition.destination
        ));
        let guards = transition.guard_descriptions();
        if !guards.is_empty() {
            output.push_str(&format!(" [{}]", guards.join(" && ")));
        }
        output.push('\n');
    }

    output.trim_end().to_string()
}

/// Parses a JSON argument, which can be inline JSON or @file reference.
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
