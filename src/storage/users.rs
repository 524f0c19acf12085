use redb::ReadableTable;
use thiserror::Error;
use uuid::Uuid;

use super::db::{Database, DatabaseError};
use super::models::{User, UserFile};
use super::tables::*;
use crate::key::ObjectKey;

#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Association write failed: {0}")]
    WriteFailed(#[from] DatabaseError),
}

/// Links a user to an uploaded object.
///
/// Called after the object is already durable in the blob store; a failure here
/// never rolls the object back.
pub trait AssociationRecorder: Send + Sync {
    fn record_association(
        &self,
        user_id: Uuid,
        key: &ObjectKey,
        file_url: &str,
    ) -> Result<(), AssociationError>;
}

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Insert or replace a user record
    pub fn put_user(&self, user: &User) -> Result<(), DatabaseError> {
        debug_assert!(!user.name.is_empty(), "user name must not be empty");

        let id = user.id.to_string();
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            let data = rmp_serde::to_vec_named(user)?;
            table.insert(id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(id.to_string().as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// All users, oldest first
    pub fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let mut users = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let user: User = rmp_serde::from_slice(value.value())?;
            users.push(user);
        }
        users.sort_by_key(|u| u.created_at);

        Ok(users)
    }

    /// Remove a user record and its file associations. The objects themselves
    /// are left in place.
    pub fn delete_user(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let id_str = id.to_string();
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(USERS)?;
            let removed = table.remove(id_str.as_str())?.is_some();
            removed
        };
        {
            let mut files_table = write_txn.open_table(USER_FILES)?;
            files_table.remove(id_str.as_str())?;
        }
        write_txn.commit()?;
        Ok(deleted)
    }

    // ========================================================================
    // File associations
    // ========================================================================

    /// Objects linked to a user, in the order they were linked.
    pub fn list_user_files(&self, id: Uuid) -> Result<Vec<UserFile>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USER_FILES)?;

        match table.get(id.to_string().as_str())? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(Vec::new()),
        }
    }

    /// Link an object to an existing user. Re-linking the same key replaces the
    /// earlier entry. Returns `false` if no such user exists.
    pub fn add_user_file(
        &self,
        id: Uuid,
        key: &ObjectKey,
        file_url: &str,
    ) -> Result<bool, DatabaseError> {
        let id_str = id.to_string();
        let write_txn = self.begin_write()?;

        let user_exists = {
            let table = write_txn.open_table(USERS)?;
            let exists = table.get(id_str.as_str())?.is_some();
            exists
        };
        if !user_exists {
            return Ok(false);
        }

        {
            let mut files_table = write_txn.open_table(USER_FILES)?;
            let mut files: Vec<UserFile> = match files_table.get(id_str.as_str())? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => Vec::new(),
            };
            files.retain(|f| f.key != key.as_str());
            files.push(UserFile {
                key: key.to_string(),
                file_url: file_url.to_string(),
                created_at: chrono::Utc::now(),
            });
            let data = rmp_serde::to_vec_named(&files)?;
            files_table.insert(id_str.as_str(), data.as_slice())?;
        }

        write_txn.commit()?;
        Ok(true)
    }

    /// Set or clear the user's profile picture association.
    /// Returns the updated user, or `None` if no such user exists.
    pub fn set_profile_picture(
        &self,
        id: Uuid,
        picture: Option<(&ObjectKey, &str)>,
    ) -> Result<Option<User>, DatabaseError> {
        let id_str = id.to_string();
        let write_txn = self.begin_write()?;

        let existing: Option<User> = {
            let table = write_txn.open_table(USERS)?;
            let result = match table.get(id_str.as_str())? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        let updated = match existing {
            Some(mut user) => {
                user.profile_picture_key = picture.map(|(key, _)| key.to_string());
                user.profile_picture_url = picture.map(|(_, url)| url.to_string());
                user.updated_at = chrono::Utc::now();

                let data = rmp_serde::to_vec_named(&user)?;
                let mut table = write_txn.open_table(USERS)?;
                table.insert(id_str.as_str(), data.as_slice())?;
                Some(user)
            }
            None => None,
        };

        write_txn.commit()?;
        Ok(updated)
    }
}

impl AssociationRecorder for Database {
    fn record_association(
        &self,
        user_id: Uuid,
        key: &ObjectKey,
        file_url: &str,
    ) -> Result<(), AssociationError> {
        if self.add_user_file(user_id, key, file_url)? {
            Ok(())
        } else {
            Err(AssociationError::UserNotFound(user_id))
        }
    }
}
