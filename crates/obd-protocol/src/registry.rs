//! Command Registry
//!
//! Append-only set of diagnostic commands keyed by name.

use crate::command::DiagnosticCommand;
use crate::commands;
use crate::error::RegistryError;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Registry of every command the agent may query or watch
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<DiagnosticCommand>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in commands
    pub fn with_builtin() -> Self {
        let commands = commands::builtin();
        let index = commands
            .iter()
            .enumerate()
            .map(|(i, command)| (command.name().to_string(), i))
            .collect();
        Self { commands, index }
    }

    /// Register a command; names must be unique
    pub fn register(&mut self, command: DiagnosticCommand) -> Result<(), RegistryError> {
        if self.index.contains_key(command.name()) {
            return Err(RegistryError::DuplicateCommand(command.name().to_string()));
        }
        debug!(
            "Registered command {} ({}{})",
            command.name(),
            command.request_code(),
            if command.is_extended() { ", extended" } else { "" }
        );
        self.index.insert(command.name().to_string(), self.commands.len());
        self.commands.push(command);
        Ok(())
    }

    /// Look up a command by name
    pub fn get(&self, name: &str) -> Result<&DiagnosticCommand, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.commands[i])
            .ok_or_else(|| RegistryError::UnknownCommand(name.to_string()))
    }

    /// Whether a command with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Commands in registration order
    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticCommand> {
        self.commands.iter()
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no command is registered
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether the transport reported this command as supported
    pub fn is_supported(command: &DiagnosticCommand, supported: &HashSet<String>) -> bool {
        supported.contains(command.name())
    }
}
