//! Things a rule can do to a message.
//!
//! Actions only ever reach the mail store through a `MutationGateway`. An
//! error from `process` stops the remaining actions for that message; the
//! scan moves on to the next one.

use std::fmt;

use tracing::{debug, info};

use crate::error::ActionError;
use crate::message::MessageView;
use crate::session::gateway::MutationGateway;

/// A side effect applied to a matched message.
pub trait Action: fmt::Debug {
    fn process(&self, gateway: &MutationGateway, message: &MessageView) -> Result<(), ActionError>;
}

/// Boxed action as stored in rules.
pub type BoxAction = Box<dyn Action>;

/// Move a message into another folder, creating the folder if needed.
///
/// Copies first and deletes second. If the delete fails the message is left
/// in both folders.
#[derive(Debug, Clone)]
pub struct Move {
    target: String,
}

impl Move {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Action for Move {
    fn process(&self, gateway: &MutationGateway, message: &MessageView) -> Result<(), ActionError> {
        let uid = message.uid();
        // TODO: try the copy first and only create the folder on a TRYCREATE
        // response, saving the existence check per message.
        if !gateway.folder_exists(&self.target)? {
            gateway
                .create_folder(&self.target)
                .map_err(|source| ActionError::FolderCreate {
                    folder: self.target.clone(),
                    source,
                })?;
            info!(folder = %self.target, "Created folder");
        }
        gateway.copy(uid, &self.target)?;
        gateway.delete_messages(uid)?;
        debug!(uid, folder = %self.target, "Moved message");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteMessage;

impl Action for DeleteMessage {
    fn process(&self, gateway: &MutationGateway, message: &MessageView) -> Result<(), ActionError> {
        gateway.delete_messages(message.uid())?;
        debug!(uid = message.uid(), "Deleted message");
        Ok(())
    }
}

/// Log a line about the message. Touches nothing on the server.
///
/// Placeholders: `{}` for the quoted subject, plus `{uid}`, `{subject}` and `{from}`.
#[derive(Debug, Clone)]
pub struct LogMessage {
    template: String,
}

impl LogMessage {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, message: &MessageView) -> String {
        let mut out = self.template.replace("{uid}", &message.uid().to_string());
        if out.contains("{subject}") {
            let subject = message.subject().ok().flatten().unwrap_or_default();
            out = out.replace("{subject}", &subject);
        }
        if out.contains("{from}") {
            let from = message.from().ok().flatten().unwrap_or_default();
            out = out.replace("{from}", &from);
        }
        out.replace("{}", &message.repr())
    }
}

impl Action for LogMessage {
    fn process(&self, _gateway: &MutationGateway, message: &MessageView) -> Result<(), ActionError> {
        info!(uid = message.uid(), "{}", self.render(message));
        Ok(())
    }
}

/// Flag or label change named at load time, e.g. `add_flags` with `["\\Seen"]`.
///
/// The operation is checked against the gateway allow-list when it runs.
#[derive(Debug, Clone)]
pub struct StoreFlags {
    operation: String,
    values: Vec<String>,
}

impl StoreFlags {
    pub fn new(operation: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            values,
        }
    }
}

impl Action for StoreFlags {
    fn process(&self, gateway: &MutationGateway, message: &MessageView) -> Result<(), ActionError> {
        gateway.store_by_name(&self.operation, message.uid(), &self.values)?;
        debug!(uid = message.uid(), operation = %self.operation, "Stored flags");
        Ok(())
    }
}
