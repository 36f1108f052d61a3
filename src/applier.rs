//! # DM command applier

use crate::{model::OpticalSystem, validation::Issues, ModalVector, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Modal command of a DM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmCommand {
    /// DM id
    pub dm: String,
    pub command: Vec<f64>,
}
impl DmCommand {
    pub fn new<S: Into<String>>(dm: S, command: Vec<f64>) -> Self {
        Self {
            dm: dm.into(),
            command,
        }
    }
}

/// Returns a new snapshot with the command of DM `dm_id` replaced by `command`
///
/// The input snapshot is left untouched.
pub fn apply(model: &OpticalSystem, dm_id: &str, command: &[f64]) -> Result<OpticalSystem> {
    apply_all(model, &[DmCommand::new(dm_id, command.to_vec())])
}

/// Returns a new snapshot with all the `commands` applied
///
/// Either every command is applied or none is; a DM gets at most one command.
pub fn apply_all(model: &OpticalSystem, commands: &[DmCommand]) -> Result<OpticalSystem> {
    let mut issues = Issues::default();
    let mut updated = model.commands().to_vec();
    let mut commanded = HashSet::new();
    for DmCommand { dm, command } in commands {
        match model.dm_index(dm) {
            None => issues.unknown_reference("command", "DM", dm),
            Some(k) if !commanded.insert(k) => issues.invalid(dm, "more than one command"),
            Some(k) => {
                if issues.dimension(dm, "command", model.n_mode(), command.len()) {
                    updated[k] = ModalVector::from_column_slice(command);
                }
            }
        }
    }
    issues.into_result()?;
    log::debug!("{} DM commands applied", commands.len());
    Ok(model.with_commands(updated))
}
