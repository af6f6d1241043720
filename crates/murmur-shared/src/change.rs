//! Row-level change events.
//!
//! Every successful write against the store produces one [`ChangeEvent`].
//! The realtime layer fans these out to subscribers whose [`ChangeFilter`]
//! matches, which is how a write made by one client reaches every other
//! interested client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::models::{ChatRequest, ConversationRow, Message, Participant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    ConversationParticipants,
    Messages,
    ChatRequests,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Conversations => "conversations",
            Table::ConversationParticipants => "conversation_participants",
            Table::Messages => "messages",
            Table::ChatRequests => "chat_requests",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversations" => Ok(Table::Conversations),
            "conversation_participants" => Ok(Table::ConversationParticipants),
            "messages" => Ok(Table::Messages),
            "chat_requests" => Ok(Table::ChatRequests),
            other => Err(ModelError::UnknownTable(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row a change refers to. For deletes this is the row as it was.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Row {
    Conversation(ConversationRow),
    Participant(Participant),
    Message(Message),
    ChatRequest(ChatRequest),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Conversation(_) => Table::Conversations,
            Row::Participant(_) => Table::ConversationParticipants,
            Row::Message(_) => Table::Messages,
            Row::ChatRequest(_) => Table::ChatRequests,
        }
    }

    /// String value of a column, as the backend would compare it in an
    /// equality filter. `None` for unknown or null columns.
    pub fn column(&self, name: &str) -> Option<String> {
        let value = serde_json::to_value(self).ok()?;
        match value.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: Row,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            kind: ChangeKind::Insert,
            row,
        }
    }

    pub fn update(row: Row) -> Self {
        Self {
            kind: ChangeKind::Update,
            row,
        }
    }

    pub fn delete(row: Row) -> Self {
        Self {
            kind: ChangeKind::Delete,
            row,
        }
    }

    pub fn table(&self) -> Table {
        self.row.table()
    }
}

/// Subscription scope: one table, optionally narrowed by `column = value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self { table, eq: None }
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.eq = Some((column.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table() != self.table {
            return false;
        }
        match &self.eq {
            None => true,
            Some((column, value)) => event.row.column(column).as_deref() == Some(value.as_str()),
        }
    }
}

/// Receiver of the store's change feed.
pub trait ChangeSink: Send + Sync {
    fn emit(&self, event: ChangeEvent);
}
