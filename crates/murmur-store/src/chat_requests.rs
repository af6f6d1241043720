//! CRUD operations for [`ChatRequest`] records.
//!
//! Status transitions are conditional on the current status so that two
//! racing writers cannot both move the same request out of `pending`.

use chrono::{DateTime, Utc};
use murmur_shared::{ChatRequest, RequestId, RequestStatus, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sql::{conversion_err, parse_id, parse_opt_ts, parse_ts, ts};

const REQUEST_COLUMNS: &str =
    "id, requester_id, recipient_id, status, created_at, updated_at, denied_at";

impl Database {
    /// Insert a new request.
    ///
    /// Fails with [`StoreError::UniqueViolation`] while a pending request
    /// exists for the pair, in either direction.
    pub fn insert_chat_request(&self, request: &ChatRequest) -> Result<()> {
        if request.status == RequestStatus::Pending
            && self
                .find_pending_request(request.recipient_id, request.requester_id)?
                .is_some()
        {
            return Err(StoreError::UniqueViolation(
                "a pending request already exists for this pair".into(),
            ));
        }

        self.conn().execute(
            "INSERT INTO chat_requests (id, requester_id, recipient_id, status, created_at, updated_at, denied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id.to_string(),
                request.requester_id.to_string(),
                request.recipient_id.to_string(),
                request.status.as_str(),
                ts(&request.created_at),
                ts(&request.updated_at),
                request.denied_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_chat_request(&self, id: RequestId) -> Result<Option<ChatRequest>> {
        let request = self
            .conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM chat_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Pending request from `requester` to `recipient` (this direction only).
    pub fn find_pending_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>> {
        let request = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM chat_requests
                     WHERE requester_id = ?1 AND recipient_id = ?2 AND status = 'pending'"
                ),
                params![requester.to_string(), recipient.to_string()],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Most recent denial of `requester` by `recipient` (this direction only).
    pub fn latest_denied_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>> {
        let request = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM chat_requests
                     WHERE requester_id = ?1 AND recipient_id = ?2 AND status = 'denied'
                     ORDER BY denied_at DESC
                     LIMIT 1"
                ),
                params![requester.to_string(), recipient.to_string()],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Whether an accepted request exists between `a` and `b`, either direction.
    pub fn has_accepted_request(&self, a: UserId, b: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_requests
             WHERE status = 'accepted'
               AND ((requester_id = ?1 AND recipient_id = ?2)
                 OR (requester_id = ?2 AND recipient_id = ?1))",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Move a request from `from` to `to`. Returns `None` when the request is
    /// no longer in `from` (someone else moved it first).
    ///
    /// Only the recipient may answer a request.
    pub fn transition_chat_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Option<ChatRequest>> {
        let existing = self.get_chat_request(id)?.ok_or(StoreError::NotFound)?;
        if existing.recipient_id != acting {
            return Err(StoreError::PermissionDenied(format!(
                "{acting} is not the recipient of request {id}"
            )));
        }

        let denied_at = (to == RequestStatus::Denied).then(|| ts(&at));
        let affected = self.conn().execute(
            "UPDATE chat_requests
             SET status = ?3, updated_at = ?4, denied_at = COALESCE(?5, denied_at)
             WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), ts(&at), denied_at],
        )?;
        if affected == 0 {
            return Ok(None);
        }

        self.get_chat_request(id)
    }

    /// Every request `user` sent or received, newest first.
    pub fn list_chat_requests(&self, user: UserId) -> Result<Vec<ChatRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM chat_requests
             WHERE requester_id = ?1 OR recipient_id = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRequest> {
    let id_str: String = row.get(0)?;
    let requester_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(ChatRequest {
        id: parse_id(0, &id_str)?,
        requester_id: parse_id(1, &requester_str)?,
        recipient_id: parse_id(2, &recipient_str)?,
        status: status_str.parse().map_err(|e| conversion_err(3, e))?,
        created_at: parse_ts(4, &created_str)?,
        updated_at: parse_ts(5, &updated_str)?,
        denied_at: parse_opt_ts(6, row.get(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::seeded;
    use chrono::Duration;

    #[test]
    fn one_pending_request_per_pair_in_either_direction() {
        let (db, users) = seeded(&["alice", "bob"]);
        let (a, b) = (users[0].id, users[1].id);

        db.insert_chat_request(&ChatRequest::new(a, b, Utc::now()))
            .unwrap();
        assert!(matches!(
            db.insert_chat_request(&ChatRequest::new(a, b, Utc::now())),
            Err(StoreError::UniqueViolation(_))
        ));
        assert!(matches!(
            db.insert_chat_request(&ChatRequest::new(b, a, Utc::now())),
            Err(StoreError::UniqueViolation(_))
        ));
    }

    #[test]
    fn deny_stamps_denied_at_and_only_once() {
        let (db, users) = seeded(&["alice", "bob"]);
        let (a, b) = (users[0].id, users[1].id);
        let request = ChatRequest::new(a, b, Utc::now());
        db.insert_chat_request(&request).unwrap();

        assert!(matches!(
            db.transition_chat_request(
                request.id,
                RequestStatus::Pending,
                RequestStatus::Denied,
                Utc::now(),
                a
            ),
            Err(StoreError::PermissionDenied(_))
        ));

        let denied_at = Utc::now();
        let denied = db
            .transition_chat_request(
                request.id,
                RequestStatus::Pending,
                RequestStatus::Denied,
                denied_at,
                b,
            )
            .unwrap()
            .unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert!(denied.denied_at.is_some());

        let again = db
            .transition_chat_request(
                request.id,
                RequestStatus::Pending,
                RequestStatus::Accepted,
                Utc::now(),
                b,
            )
            .unwrap();
        assert!(again.is_none());

        let latest = db.latest_denied_request(a, b).unwrap().unwrap();
        assert_eq!(latest.id, request.id);
        assert!(db.latest_denied_request(b, a).unwrap().is_none());
    }

    #[test]
    fn accepted_requests_count_in_both_directions() {
        let (db, users) = seeded(&["alice", "bob"]);
        let (a, b) = (users[0].id, users[1].id);
        let request = ChatRequest::new(a, b, Utc::now() - Duration::minutes(1));
        db.insert_chat_request(&request).unwrap();
        assert!(!db.has_accepted_request(b, a).unwrap());

        db.transition_chat_request(
            request.id,
            RequestStatus::Pending,
            RequestStatus::Accepted,
            Utc::now(),
            b,
        )
        .unwrap();
        assert!(db.has_accepted_request(b, a).unwrap());
        assert_eq!(db.list_chat_requests(a).unwrap().len(), 1);
    }
}
