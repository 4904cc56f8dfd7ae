use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::error::AppError;
use crate::state::AppState;
use crate::storage::Visibility;
use crate::users::repo_types::{User, UserField};

/// One uploaded file, alive only for the duration of an upload call.
pub struct FileUpload<S> {
    pub filename: String,
    pub content_type: String,
    pub declared_size: Option<u64>,
    pub body: S,
}

/// Object key for a user's file: `{user_id}-{filename}`.
///
/// The same pair always maps to the same key, so re-uploading a file name
/// overwrites the previous object.
pub fn object_key(user_id: impl std::fmt::Display, filename: &str) -> String {
    format!("{}-{}", user_id, filename)
}

fn validate_filename(filename: &str) -> Result<(), AppError> {
    if filename.is_empty() {
        return Err(AppError::Validation("filename is required".into()));
    }
    if filename
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(AppError::Validation(format!(
            "filename {filename:?} contains path separators or control characters"
        )));
    }
    Ok(())
}

/// Buffers the whole stream, failing once it grows past `limit` bytes.
async fn read_to_limit<S, E>(body: S, limit: u64) -> Result<Bytes, AppError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| io::Error::other(format!("read upload stream: {e}")))?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("upload exceeds {limit} bytes"),
            )
            .into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Attach an uploaded image to a user.
///
/// Resolve user, buffer file, put object, then write the public URL back
/// with a conditional update. Nothing touches object storage unless the
/// user exists. If the final update fails the object stays in the bucket.
#[instrument(skip(st, file), fields(filename = %file.filename))]
pub async fn upload_profile_image<S, E>(
    st: &AppState,
    user_id: &str,
    file: FileUpload<S>,
) -> Result<User, AppError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    validate_filename(&file.filename)?;

    let max = st.config.max_upload_bytes;
    if let Some(declared) = file.declared_size {
        if declared > max {
            return Err(AppError::Validation(format!(
                "declared size {declared} exceeds limit of {max} bytes"
            )));
        }
    }

    let mut user = st.users.find_by_field(UserField::Id, user_id).await?;

    let limit = file.declared_size.unwrap_or(max);
    let body = read_to_limit(file.body, limit).await?;
    if let Some(declared) = file.declared_size {
        if (body.len() as u64) < declared {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("upload ended after {} of {declared} bytes", body.len()),
            )
            .into());
        }
    }
    debug!(user_id = %user.id, bytes = body.len(), "upload buffered");

    let storage_cfg = &st.config.storage;
    let key = object_key(user.id, &file.filename);
    if let Err(e) = st
        .storage
        .put_object(
            &storage_cfg.bucket,
            &key,
            body,
            &file.content_type,
            Visibility::PublicRead,
        )
        .await
    {
        warn!(user_id = %user.id, key = %key, error = %e, "object upload failed");
        return Err(AppError::Upload {
            key,
            message: format!("{e:#}"),
        });
    }

    user.image_uri = storage_cfg.public_url(&key);
    let user = st.users.update(&user).await.map_err(|e| {
        warn!(user_id = %user.id, key = %key, error = %e, "object uploaded but user update failed");
        e
    })?;

    info!(user_id = %user.id, image_uri = %user.image_uri, "profile image updated");
    Ok(user)
}

#[cfg(test)]
mod upload_tests {
    use std::sync::Arc;

    use axum::async_trait;
    use futures::stream;

    use super::*;
    use crate::storage::fake::FakeStorage;
    use crate::users::dto::CreateUserRequest;
    use crate::users::repo::memory::MemoryUserStore;
    use crate::users::repo::UserStore;
    use crate::users::services::create_user;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn file<S>(name: &str, declared: Option<u64>, body: S) -> FileUpload<S> {
        FileUpload {
            filename: name.into(),
            content_type: "image/png".into(),
            declared_size: declared,
            body,
        }
    }

    async fn ada(st: &AppState) -> User {
        create_user(
            st,
            CreateUserRequest {
                full_name: "Ada Lovelace".into(),
                email: "ada@x.io".into(),
                password: "p".into(),
            },
        )
        .await
        .unwrap()
    }

    fn setup(storage: FakeStorage) -> (AppState, Arc<FakeStorage>) {
        let storage = Arc::new(storage);
        (AppState::with_storage(storage.clone()), storage)
    }

    #[test]
    fn keys_are_deterministic_per_user_and_filename() {
        assert_eq!(object_key("u1", "avatar.png"), "u1-avatar.png");
        assert_eq!(object_key("u1", "avatar.png"), object_key("u1", "avatar.png"));
        assert_ne!(object_key("u1", "avatar.png"), object_key("u1", "avatar.jpg"));
    }

    #[test]
    fn filenames_with_separators_are_rejected() {
        assert!(validate_filename("avatar.png").is_ok());
        assert!(validate_filename("my avatar.png").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b.png").is_err());
        assert!(validate_filename("a\nb.png").is_err());
    }

    #[tokio::test]
    async fn successful_upload_sets_public_url() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;

        let updated = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", Some(10), chunks(&[b"0123", b"456789"])),
        )
        .await
        .unwrap();

        let expected = format!(
            "https://test-bucket.nyc3.digitaloceanspaces.com/{}-avatar.png",
            user.id
        );
        assert_eq!(updated.image_uri, expected);

        let found = st
            .users
            .find_by_field(UserField::Id, &user.id.to_string())
            .await
            .unwrap();
        assert_eq!(found.image_uri, expected);

        let all = st.users.list_all().await.unwrap();
        assert!(all.iter().any(|u| u.image_uri == expected));

        let puts = storage.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].bucket, "test-bucket");
        assert_eq!(puts[0].key, format!("{}-avatar.png", user.id));
        assert_eq!(&puts[0].body[..], b"0123456789");
        assert_eq!(puts[0].content_type, "image/png");
        assert_eq!(puts[0].visibility, Visibility::PublicRead);
    }

    #[tokio::test]
    async fn unknown_user_never_reaches_storage() {
        let (st, storage) = setup(FakeStorage::default());
        let err = upload_profile_image(
            &st,
            &uuid::Uuid::new_v4().to_string(),
            file("avatar.png", Some(3), chunks(&[b"abc"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_leaves_image_uri_unchanged() {
        let (st, storage) = setup(FakeStorage::failing());
        let user = ada(&st).await;

        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", Some(10), chunks(&[b"0123456789"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Upload { .. }));
        assert!(err.to_string().contains("simulated storage outage"));
        assert_eq!(storage.puts().len(), 1);

        let found = st
            .users
            .find_by_field(UserField::Id, &user.id.to_string())
            .await
            .unwrap();
        assert_eq!(found.image_uri, "");
        assert_eq!(found.version, user.version);
    }

    #[tokio::test]
    async fn repeated_uploads_point_at_latest_object() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;
        let id = user.id.to_string();

        upload_profile_image(&st, &id, file("a.png", None, chunks(&[b"one"])))
            .await
            .unwrap();
        let second = upload_profile_image(&st, &id, file("b.png", None, chunks(&[b"two"])))
            .await
            .unwrap();
        let third = upload_profile_image(&st, &id, file("a.png", None, chunks(&[b"three"])))
            .await
            .unwrap();

        assert!(second.image_uri.ends_with(&format!("{id}-b.png")));
        assert!(third.image_uri.ends_with(&format!("{id}-a.png")));
        assert_eq!(third.version, 3);

        let keys: Vec<String> = storage.puts().into_iter().map(|p| p.key).collect();
        assert_eq!(keys[0], keys[2]);
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn stream_longer_than_declared_is_io_error() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;
        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", Some(4), chunks(&[b"0123", b"4"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn stream_shorter_than_declared_is_io_error() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;
        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", Some(10), chunks(&[b"0123"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn broken_stream_is_io_error() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"01")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = upload_profile_image(&st, &user.id.to_string(), file("avatar.png", None, body))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert!(err.to_string().contains("client went away"));
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn undeclared_size_is_bounded_by_config() {
        let (st, storage) = setup(FakeStorage::default());
        let user = ada(&st).await;
        // fake config caps uploads at 1024 bytes
        let big: &'static [u8] = &[7u8; 1025];
        let err = upload_profile_image(&st, &user.id.to_string(), file("big.bin", None, chunks(&[big])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));

        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("big.bin", Some(4096), chunks(&[b"x"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(storage.puts().is_empty());
    }

    /// Wraps the in-memory store; reads race a writer or updates fail.
    struct FlakyStore {
        inner: MemoryUserStore,
        race_after_read: bool,
        fail_updates: bool,
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn create(&self, user: &User) -> Result<User, AppError> {
            self.inner.create(user).await
        }

        async fn find_by_field(&self, field: UserField, value: &str) -> Result<User, AppError> {
            let read = self.inner.find_by_field(field, value).await?;
            if self.race_after_read {
                let mut other = read.clone();
                other.full_name = "Augusta Ada King".into();
                self.inner.update(&other).await?;
            }
            Ok(read)
        }

        async fn update(&self, user: &User) -> Result<User, AppError> {
            if self.fail_updates {
                return Err(AppError::persistence("connection reset by peer"));
            }
            self.inner.update(user).await
        }

        async fn list_all(&self) -> Result<Vec<User>, AppError> {
            self.inner.list_all().await
        }
    }

    fn flaky_setup(race_after_read: bool, fail_updates: bool) -> (AppState, Arc<FakeStorage>) {
        let storage = Arc::new(FakeStorage::default());
        let users = Arc::new(FlakyStore {
            inner: MemoryUserStore::default(),
            race_after_read,
            fail_updates,
        });
        let st = AppState::from_parts(AppState::fake().config, users, storage.clone());
        (st, storage)
    }

    #[tokio::test]
    async fn write_race_after_upload_is_conflict_and_leaves_object() {
        let (st, storage) = flaky_setup(true, false);
        let user = ada(&st).await;

        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", None, chunks(&[b"png"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // The object is already in the bucket.
        assert_eq!(storage.puts().len(), 1);

        let rows = st.users.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_uri, "");
        assert_eq!(rows[0].full_name, "Augusta Ada King");
    }

    #[tokio::test]
    async fn failed_update_after_upload_is_persistence_and_leaves_object() {
        let (st, storage) = flaky_setup(false, true);
        let user = ada(&st).await;

        let err = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", Some(3), chunks(&[b"png"])),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Persistence { .. }));
        assert_eq!(storage.puts().len(), 1);

        let found = st
            .users
            .find_by_field(UserField::Id, &user.id.to_string())
            .await
            .unwrap();
        assert_eq!(found.image_uri, "");
        assert_eq!(found.version, user.version);
    }

    #[tokio::test]
    async fn upload_after_foreign_update_rereads_row() {
        let (st, _storage) = setup(FakeStorage::default());
        let user = ada(&st).await;

        // Someone else updates the row between our read and our write.
        let mut other = user.clone();
        other.full_name = "Augusta Ada King".into();
        st.users.update(&other).await.unwrap();

        let mut stale = user.clone();
        stale.image_uri = "https://elsewhere/x.png".into();
        let err = st.users.update(&stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // A fresh upload re-reads the row and succeeds.
        let updated = upload_profile_image(
            &st,
            &user.id.to_string(),
            file("avatar.png", None, chunks(&[b"png"])),
        )
        .await
        .unwrap();
        assert_eq!(updated.full_name, "Augusta Ada King");
        assert_eq!(updated.version, 2);
    }
}
