//! Commands accepted by the vault store.

use zeroize::Zeroizing;

use super::storage::WriteTicket;
use crate::bridge::SessionToken;

/// Every mutation of the vault goes through one of these.
///
/// Mutating commands carry the password; it is checked again on each one.
pub enum VaultCommand {
    Create {
        password: Zeroizing<String>,
        seed_phrase: Zeroizing<String>,
    },
    Unseal {
        password: Zeroizing<String>,
    },
    Seal,
    Erase,
    AddAccount {
        password: Zeroizing<String>,
        address: String,
        name: String,
        public_key: String,
    },
    UpdateAccount {
        password: Zeroizing<String>,
        address: String,
        name: String,
        public_key: String,
    },
    RemoveAccount {
        password: Zeroizing<String>,
        address: String,
    },
    ImportKey {
        password: Zeroizing<String>,
        name: String,
        secret_key: Zeroizing<String>,
        public_key: String,
    },
    SelectAccount {
        password: Zeroizing<String>,
        address: String,
    },
}

impl VaultCommand {
    pub fn name(&self) -> &'static str {
        match self {
            VaultCommand::Create { .. } => "create",
            VaultCommand::Unseal { .. } => "unseal",
            VaultCommand::Seal => "seal",
            VaultCommand::Erase => "erase",
            VaultCommand::AddAccount { .. } => "addAccount",
            VaultCommand::UpdateAccount { .. } => "updateAccount",
            VaultCommand::RemoveAccount { .. } => "removeAccount",
            VaultCommand::ImportKey { .. } => "importKey",
            VaultCommand::SelectAccount { .. } => "selectAccount",
        }
    }
}

impl std::fmt::Debug for VaultCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Passwords, phrases and secret keys never show up in logs
        match self {
            VaultCommand::AddAccount { address, .. }
            | VaultCommand::UpdateAccount { address, .. }
            | VaultCommand::RemoveAccount { address, .. }
            | VaultCommand::SelectAccount { address, .. } => f
                .debug_struct(self.name())
                .field("address", address)
                .finish_non_exhaustive(),
            VaultCommand::ImportKey { name, .. } => f
                .debug_struct(self.name())
                .field("name", name)
                .finish_non_exhaustive(),
            _ => f.write_str(self.name()),
        }
    }
}

/// What the privileged context should do with its session after a command.
#[derive(Debug)]
pub enum SessionEvent {
    None,
    Start(SessionToken),
    End,
}

/// Result of a successfully applied command.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Durable write queued by the command, if it changed the record.
    pub write: Option<WriteTicket>,
    pub session: SessionEvent,
}

impl CommandOutcome {
    pub(crate) fn unchanged() -> Self {
        Self {
            write: None,
            session: SessionEvent::None,
        }
    }
}
