//! Persona store and slash-command control plane (§4.6).
//!
//! Personas live in `config.agent.personas`, an ordered list with a single
//! active id. The control plane is a small command interpreter over that
//! list; it never touches the graph or the agent loop directly so it can
//! be driven from the CLI `agent` REPL or, eventually, a TUI front-end.

use anyhow::{bail, Result};
use chrono::Utc;

use crate::config::{AgentConfig, PersonaConfig};
use crate::llm::{generate_text, ChatTurn, LLMProvider};
use crate::models::Persona;

/// Converts the config-level persona entry (as loaded from TOML) into the
/// runtime [`Persona`] record, stamping a creation time since the config
/// form has none.
pub fn to_runtime_persona(cfg: &PersonaConfig) -> Persona {
    Persona {
        id: cfg.id.clone(),
        name: cfg.name.clone(),
        color: cfg.color,
        language: cfg.language.clone(),
        description: cfg.description.clone(),
        persona: cfg.persona.clone(),
        is_default: cfg.is_default,
        created_at: Utc::now(),
    }
}

pub fn active_persona(config: &AgentConfig) -> Result<&PersonaConfig> {
    config
        .personas
        .iter()
        .find(|p| p.id == config.active_persona_id)
        .ok_or_else(|| anyhow::anyhow!("active_persona_id '{}' matches no persona", config.active_persona_id))
}

/// Output of a slash command: either a message to show the user, or a
/// request to persist the (possibly mutated) config back to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub message: String,
    pub config_changed: bool,
}

fn outcome(message: impl Into<String>, config_changed: bool) -> CommandOutcome {
    CommandOutcome { message: message.into(), config_changed }
}

const HELP_TEXT: &str = "\
/help                                    list commands
/personas                                list personas (index, active marker, description)
/set-persona <name|index>                switch the active persona
/create-persona name | color | language | description
                                          expand description into a persona prompt via the LLM and persist it
/delete-persona <name>                   delete a non-default persona";

/// Dispatches one slash command line against the agent config. `line`
/// includes the leading `/`. Returns `Ok(None)` for non-command input so
/// callers can fall through to the normal agent loop.
pub async fn dispatch_command(
    line: &str,
    config: &mut AgentConfig,
    llm_provider: &dyn LLMProvider,
    llm_config: &crate::config::LLMConfig,
) -> Result<Option<CommandOutcome>> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(None);
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    let result = match cmd {
        "/help" => outcome(HELP_TEXT, false),
        "/personas" => outcome(list_personas(config), false),
        "/set-persona" => set_persona(config, rest)?,
        "/create-persona" => create_persona(config, rest, llm_provider, llm_config).await?,
        "/delete-persona" => delete_persona(config, rest)?,
        other => bail!("unknown command '{}'; try /help", other),
    };

    Ok(Some(result))
}

fn list_personas(config: &AgentConfig) -> String {
    config
        .personas
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let marker = if p.id == config.active_persona_id { "*" } else { " " };
            format!("{marker} [{i}] {} — {}", p.name, p.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn find_persona_index(config: &AgentConfig, name_or_index: &str) -> Option<usize> {
    if let Ok(idx) = name_or_index.parse::<usize>() {
        if idx < config.personas.len() {
            return Some(idx);
        }
    }
    config.personas.iter().position(|p| p.name.eq_ignore_ascii_case(name_or_index) || p.id == name_or_index)
}

/// Public wrapper over [`find_persona_index`] for callers outside this module
/// (the CLI's `--persona` override) that only need an existence check.
pub fn find_persona_index_pub(config: &AgentConfig, name_or_index: &str) -> Option<usize> {
    find_persona_index(config, name_or_index)
}

fn set_persona(config: &mut AgentConfig, name_or_index: &str) -> Result<CommandOutcome> {
    if name_or_index.is_empty() {
        bail!("usage: /set-persona <name|index>");
    }
    let idx = find_persona_index(config, name_or_index)
        .ok_or_else(|| anyhow::anyhow!("no persona matches '{}'", name_or_index))?;
    config.active_persona_id = config.personas[idx].id.clone();
    Ok(outcome(format!("active persona is now '{}'", config.personas[idx].name), true))
}

async fn create_persona(
    config: &mut AgentConfig,
    args: &str,
    llm_provider: &dyn LLMProvider,
    llm_config: &crate::config::LLMConfig,
) -> Result<CommandOutcome> {
    let fields: Vec<&str> = args.splitn(4, '|').map(str::trim).collect();
    if fields.len() != 4 {
        bail!("usage: /create-persona name | color | language | description");
    }
    let [name, color_str, language, description] = [fields[0], fields[1], fields[2], fields[3]];
    if name.is_empty() || description.is_empty() {
        bail!("name and description are required");
    }
    let color = parse_color(color_str)?;

    let id = name.to_lowercase().replace(' ', "-");
    if config.personas.iter().any(|p| p.id == id) {
        bail!("a persona with id '{}' already exists", id);
    }

    let expansion_prompt = format!(
        "Expand this short description into a second-person persona prompt (2-4 sentences) \
         that will be used as a system-prompt voice for an AI assistant named '{name}': {description}"
    );
    let persona_text = generate_text(
        llm_provider,
        llm_config,
        &[
            ChatTurn::system("You write concise second-person persona prompts."),
            ChatTurn::user(expansion_prompt),
        ],
    )
    .await
    .unwrap_or_else(|_| format!("You are {name}. {description}"));

    config.personas.push(PersonaConfig {
        id: id.clone(),
        name: name.to_string(),
        color,
        language: if language.is_empty() { "en".to_string() } else { language.to_string() },
        description: description.to_string(),
        persona: persona_text,
        is_default: false,
    });

    Ok(outcome(format!("created persona '{}' ({})", name, id), true))
}

fn delete_persona(config: &mut AgentConfig, name_or_index: &str) -> Result<CommandOutcome> {
    if name_or_index.is_empty() {
        bail!("usage: /delete-persona <name>");
    }
    let idx = find_persona_index(config, name_or_index)
        .ok_or_else(|| anyhow::anyhow!("no persona matches '{}'", name_or_index))?;
    if config.personas[idx].is_default {
        bail!("'{}' is a built-in persona and cannot be deleted", config.personas[idx].name);
    }
    let deleted = config.personas.remove(idx);
    if config.active_persona_id == deleted.id {
        if let Some(fallback) = config.personas.iter().find(|p| p.is_default) {
            config.active_persona_id = fallback.id.clone();
        }
    }
    Ok(outcome(format!("deleted persona '{}'", deleted.name), true))
}

fn parse_color(raw: &str) -> Result<crate::models::PersonaColor> {
    use crate::models::PersonaColor::*;
    Ok(match raw.to_lowercase().as_str() {
        "red" => Red,
        "green" => Green,
        "yellow" => Yellow,
        "blue" | "" => Blue,
        "magenta" => Magenta,
        "cyan" => Cyan,
        "white" => White,
        "gray" | "grey" => Gray,
        other => bail!("unknown persona color '{}'", other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledProvider;

    fn test_llm_config() -> crate::config::LLMConfig {
        crate::config::LLMConfig::default()
    }

    #[tokio::test]
    async fn set_persona_switches_active_id() {
        let mut config = AgentConfig::default();
        let outcome = dispatch_command("/set-persona reviewer", &mut config, &DisabledProvider, &test_llm_config())
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.config_changed);
        assert_eq!(config.active_persona_id, "reviewer");
    }

    #[tokio::test]
    async fn delete_persona_refuses_builtins() {
        let mut config = AgentConfig::default();
        let result = dispatch_command("/delete-persona assistant", &mut config, &DisabledProvider, &test_llm_config()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_persona_falls_back_without_llm() {
        let mut config = AgentConfig::default();
        let outcome = dispatch_command(
            "/create-persona Dev | cyan | en | terse senior engineer",
            &mut config,
            &DisabledProvider,
            &test_llm_config(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(outcome.config_changed);
        assert!(config.personas.iter().any(|p| p.id == "dev"));
    }

    #[test]
    fn non_command_input_returns_none() {
        let mut config = AgentConfig::default();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt
            .block_on(dispatch_command("what is a Scope?", &mut config, &DisabledProvider, &test_llm_config()))
            .unwrap();
        assert!(result.is_none());
    }
}
