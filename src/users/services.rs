use std::sync::Arc;

use uuid::Uuid;

use crate::users::error::{UserError, UserResult};
use crate::users::store::{User, UserFilter, UserStore};

/// Largest page size a single listing request may ask for.
const MAX_PAGE_SIZE: i64 = 100;

/// One page of users plus the total count of all matches, taken from the
/// same snapshot.
#[derive(Debug)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
}

/// Business rules for user records: email uniqueness, existence checks,
/// soft-deletion, paginated listing. Holds the store it was constructed
/// with; nothing here touches process-global state.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    async fn check_user_exists(&self, id: Uuid) -> UserResult<User> {
        self.store.find_by_id(id).await?.ok_or(UserError::NotFound)
    }

    /// Create a user. The email must not belong to any active user; a
    /// soft-deleted user's email is free for reuse.
    pub async fn create_user(&self, name: &str, email: &str) -> UserResult<User> {
        if self.store.find_by_email(email).await?.is_some() {
            return Err(UserError::EmailTaken);
        }
        self.store.insert(name, email).await
    }

    /// Paginated listing of active users in insertion order. `page` is
    /// clamped to >= 1 and `limit` to 1..=100; `search` restricts to
    /// emails containing the string, case-insensitively.
    pub async fn get_users(
        &self,
        page: i64,
        limit: i64,
        search: Option<String>,
    ) -> UserResult<UserPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let skip = (page - 1) * limit;

        let filter = UserFilter { search };
        let (users, total) = self.store.list_page(&filter, skip, limit).await?;
        Ok(UserPage { users, total })
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> UserResult<User> {
        self.check_user_exists(id).await
    }

    /// Overwrite name and email. The existence check and the cross-user
    /// email check both run before the write; a failure leaves the stored
    /// record untouched. Updating a user to its own current email is not a
    /// conflict.
    pub async fn update_user(&self, id: Uuid, name: &str, email: &str) -> UserResult<User> {
        self.check_user_exists(id).await?;

        if let Some(existing) = self.store.find_by_email(email).await? {
            if existing.id != id {
                return Err(UserError::EmailTaken);
            }
        }

        self.store.update(id, name, email).await
    }

    /// Mark a user deleted. Deletion is terminal: the user disappears from
    /// all reads and its email becomes reusable.
    pub async fn soft_delete_user(&self, id: Uuid) -> UserResult<User> {
        self.check_user_exists(id).await?;
        self.store.soft_delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::store::memory::MemoryStore;

    fn directory() -> UserDirectory {
        UserDirectory::new(Arc::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn create_returns_active_user() {
        let dir = directory();
        let user = dir.create_user("Alice", "alice@x.com").await.expect("create");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.name, "Alice");
        assert!(user.deleted_at.is_none());
    }

    #[tokio::test]
    async fn create_rejects_taken_email() {
        let dir = directory();
        dir.create_user("Alice", "alice@x.com").await.expect("create");
        let err = dir
            .create_user("Another Alice", "alice@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::EmailTaken));
    }

    #[tokio::test]
    async fn get_by_id_excludes_deleted() {
        let dir = directory();
        let user = dir.create_user("Alice", "alice@x.com").await.expect("create");
        dir.soft_delete_user(user.id).await.expect("delete");

        let err = dir.get_user_by_id(user.id).await.unwrap_err();
        assert!(matches!(err, UserError::NotFound));
    }

    #[tokio::test]
    async fn email_reusable_after_soft_delete() {
        let dir = directory();
        let a = dir.create_user("Alice", "alice@x.com").await.expect("create a");
        let b = dir.create_user("Bob", "bob@x.com").await.expect("create b");
        dir.soft_delete_user(a.id).await.expect("delete a");

        let c = dir
            .create_user("Carol", "alice@x.com")
            .await
            .expect("reuse of a deleted user's email");

        let page = dir.get_users(1, 10, None).await.expect("list");
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.users.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
    }

    #[tokio::test]
    async fn update_conflicts_on_other_users_email() {
        let dir = directory();
        dir.create_user("Alice", "alice@x.com").await.expect("create a");
        let b = dir.create_user("Bob", "bob@x.com").await.expect("create b");

        let err = dir
            .update_user(b.id, "Bobby", "alice@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::EmailTaken));

        // the failed update left the stored record untouched
        let stored = dir.get_user_by_id(b.id).await.expect("get b");
        assert_eq!(stored.email, "bob@x.com");
        assert_eq!(stored.name, "Bob");
    }

    #[tokio::test]
    async fn update_to_own_email_succeeds() {
        let dir = directory();
        let user = dir.create_user("Alice", "alice@x.com").await.expect("create");
        let updated = dir
            .update_user(user.id, "Alice Smith", "alice@x.com")
            .await
            .expect("self-email update");
        assert_eq!(updated.name, "Alice Smith");
        assert_eq!(updated.email, "alice@x.com");
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let dir = directory();
        let err = dir
            .update_user(Uuid::new_v4(), "Ghost", "ghost@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::NotFound));
    }

    #[tokio::test]
    async fn soft_delete_is_terminal() {
        let dir = directory();
        let user = dir.create_user("Alice", "alice@x.com").await.expect("create");

        let deleted = dir.soft_delete_user(user.id).await.expect("delete");
        assert!(deleted.deleted_at.is_some());

        let err = dir.soft_delete_user(user.id).await.unwrap_err();
        assert!(matches!(err, UserError::NotFound));
    }

    #[tokio::test]
    async fn pagination_skips_in_insertion_order() {
        let dir = directory();
        for i in 0..5 {
            dir.create_user(&format!("User {i}"), &format!("user{i}@x.com"))
                .await
                .expect("create");
        }

        let page = dir.get_users(2, 2, None).await.expect("list");
        assert_eq!(page.total, 5);
        assert_eq!(page.users.len(), 2);
        assert_eq!(page.users[0].email, "user2@x.com");
        assert_eq!(page.users[1].email, "user3@x.com");
    }

    #[tokio::test]
    async fn non_positive_page_and_limit_are_clamped() {
        let dir = directory();
        for i in 0..3 {
            dir.create_user(&format!("User {i}"), &format!("user{i}@x.com"))
                .await
                .expect("create");
        }

        // page 0 behaves as page 1, limit -5 as limit 1
        let page = dir.get_users(0, -5, None).await.expect("list");
        assert_eq!(page.total, 3);
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].email, "user0@x.com");

        // an oversized limit is capped, never an error
        let page = dir.get_users(1, 1000, None).await.expect("list");
        assert_eq!(page.users.len(), 3);
    }

    #[tokio::test]
    async fn search_filters_case_insensitively() {
        let dir = directory();
        dir.create_user("Alice", "alice@x.com").await.expect("create");
        dir.create_user("Bob", "bob@other.org").await.expect("create");
        dir.create_user("Carol", "carol@x.com").await.expect("create");

        let page = dir
            .get_users(1, 10, Some("@X.COM".into()))
            .await
            .expect("list");
        assert_eq!(page.total, 2);
        assert!(page.users.iter().all(|u| u.email.ends_with("@x.com")));

        // total counts every match even when the page holds fewer
        let page = dir
            .get_users(1, 1, Some("@x.com".into()))
            .await
            .expect("list");
        assert_eq!(page.total, 2);
        assert_eq!(page.users.len(), 1);
    }
}
