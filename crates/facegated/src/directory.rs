//! Member directory: the people who may enroll, and which of them have.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Which members to list, relative to the enrolled descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    All,
    WithDescriptor,
    WithoutDescriptor,
}

impl MemberFilter {
    fn where_clause(self) -> &'static str {
        match self {
            MemberFilter::All => "",
            MemberFilter::WithDescriptor => {
                "WHERE EXISTS (SELECT 1 FROM face_descriptors f WHERE f.identity_id = m.user_id)"
            }
            MemberFilter::WithoutDescriptor => {
                "WHERE NOT EXISTS (SELECT 1 FROM face_descriptors f WHERE f.identity_id = m.user_id)"
            }
        }
    }
}

/// Reads and writes the `members` table on the store's connection.
#[derive(Clone)]
pub struct MemberDirectory {
    conn: Connection,
}

impl MemberDirectory {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Insert or update a member by `user_id`.
    pub async fn upsert(&self, member: Member) -> Result<(), StoreError> {
        let user_id = member.user_id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO members (user_id, display_name, email) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name,
                                                        email = excluded.email",
                    params![member.user_id, member.display_name, member.email],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!(user_id = %user_id, "member upserted");
        Ok(())
    }

    pub async fn list(&self, filter: MemberFilter) -> Result<Vec<Member>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT m.user_id, m.display_name, m.email FROM members m {} ORDER BY m.display_name, m.user_id",
                    filter.where_clause()
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok(Member {
                        user_id: row.get(0)?,
                        display_name: row.get(1)?,
                        email: row.get(2)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EnrollmentStore, NewEnrollment};
    use facegate_core::DESCRIPTOR_DIM;

    fn member(id: &str, name: &str) -> Member {
        Member {
            user_id: id.into(),
            display_name: name.into(),
            email: None,
        }
    }

    fn ids(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.user_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_set_difference_against_enrollments() {
        let store = EnrollmentStore::open_in_memory(0.5).await.unwrap();
        let directory = MemberDirectory::new(store.connection());
        directory.upsert(member("u1", "Ada")).await.unwrap();
        directory.upsert(member("u2", "Bo")).await.unwrap();
        directory.upsert(member("u3", "Cy")).await.unwrap();

        store
            .enroll(NewEnrollment {
                identity_id: "u2".into(),
                vector: vec![0.1; DESCRIPTOR_DIM],
                quality_score: 0.9,
                source_image_ref: None,
            })
            .await
            .unwrap();

        assert_eq!(ids(&directory.list(MemberFilter::All).await.unwrap()), ["u1", "u2", "u3"]);
        assert_eq!(ids(&directory.list(MemberFilter::WithDescriptor).await.unwrap()), ["u2"]);
        assert_eq!(ids(&directory.list(MemberFilter::WithoutDescriptor).await.unwrap()), ["u1", "u3"]);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = EnrollmentStore::open_in_memory(0.5).await.unwrap();
        let directory = MemberDirectory::new(store.connection());
        directory.upsert(member("u1", "Ada")).await.unwrap();
        directory
            .upsert(Member {
                email: Some("ada@example.org".into()),
                ..member("u1", "Ada L.")
            })
            .await
            .unwrap();

        let all = directory.list(MemberFilter::All).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "Ada L.");
        assert_eq!(all[0].email.as_deref(), Some("ada@example.org"));
    }
}
