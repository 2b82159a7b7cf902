use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandAction {
    ReloadSession,
    ListModels,
    SetProvider,
    SetModel,
    Help,
    Quit,
}

#[derive(Clone, Debug)]
pub struct SlashCommand {
    pub name: String,
    pub aliases: Vec<String>,
    pub usage: String,
    pub description: String,
    pub action: CommandAction,
    pub takes_argument: bool,
}

/// One line of user input, resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Chat(String),
    Command {
        action: CommandAction,
        argument: Option<String>,
    },
    MissingArgument(String),
    Unknown(String),
}

pub struct CommandRegistry {
    commands: Vec<SlashCommand>,
    lookup: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            commands: Vec::new(),
            lookup: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    fn register(&mut self, cmd: SlashCommand) {
        let index = self.commands.len();
        self.lookup.insert(cmd.name.clone(), index);
        for alias in &cmd.aliases {
            self.lookup.insert(alias.clone(), index);
        }
        self.commands.push(cmd);
    }

    fn register_all(&mut self) {
        self.register(SlashCommand {
            name: "/reload".to_string(),
            aliases: vec!["/refresh".to_string()],
            usage: "/reload".to_string(),
            description: "Fetch the session snapshot again".to_string(),
            action: CommandAction::ReloadSession,
            takes_argument: false,
        });
        self.register(SlashCommand {
            name: "/models".to_string(),
            aliases: vec![],
            usage: "/models".to_string(),
            description: "Ask the gateway for its model list".to_string(),
            action: CommandAction::ListModels,
            takes_argument: false,
        });
        self.register(SlashCommand {
            name: "/provider".to_string(),
            aliases: vec![],
            usage: "/provider <id>".to_string(),
            description: "Switch the gateway provider".to_string(),
            action: CommandAction::SetProvider,
            takes_argument: true,
        });
        self.register(SlashCommand {
            name: "/model".to_string(),
            aliases: vec![],
            usage: "/model <id>".to_string(),
            description: "Switch the active model".to_string(),
            action: CommandAction::SetModel,
            takes_argument: true,
        });
        self.register(SlashCommand {
            name: "/help".to_string(),
            aliases: vec!["/?".to_string()],
            usage: "/help".to_string(),
            description: "List commands".to_string(),
            action: CommandAction::Help,
            takes_argument: false,
        });
        self.register(SlashCommand {
            name: "/quit".to_string(),
            aliases: vec!["/exit".to_string(), "/q".to_string()],
            usage: "/quit".to_string(),
            description: "Disconnect and exit".to_string(),
            action: CommandAction::Quit,
            takes_argument: false,
        });
    }

    pub fn get(&self, name: &str) -> Option<&SlashCommand> {
        self.lookup
            .get(name)
            .and_then(|&index| self.commands.get(index))
    }

    pub fn all_commands(&self) -> &[SlashCommand] {
        &self.commands
    }

    pub fn help_text(&self) -> String {
        self.commands
            .iter()
            .map(|cmd| format!("  {:<16} {}", cmd.usage, cmd.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Lines starting with `/` are commands; anything else is a chat prompt.
    pub fn parse(&self, line: &str) -> Input {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        if !trimmed.starts_with('/') {
            return Input::Chat(trimmed.to_string());
        }

        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (trimmed, ""),
        };
        let Some(cmd) = self.get(name) else {
            return Input::Unknown(name.to_string());
        };

        let argument = (!rest.is_empty()).then(|| rest.to_string());
        if cmd.takes_argument && argument.is_none() {
            return Input::MissingArgument(cmd.usage.clone());
        }
        Input::Command {
            action: cmd.action.clone(),
            argument,
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
