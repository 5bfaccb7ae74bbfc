use crate::db::UserDao;
use crate::error::{AppError, AppResult};
use crate::models::auth::User;
use crate::services::auth::hash_password;
use tracing::{info, warn};
use validator::Validate;

#[derive(Debug, Validate)]
struct NewUser {
    #[validate(length(min = 2, max = 15, message = "Username must be between 2 and 15 characters."))]
    username: String,
    #[validate(email(message = "Invalid email address."))]
    email: String,
    #[validate(length(min = 1, max = 128, message = "Password is required."))]
    password: String,
}

/// Fields to change on an existing user; `None` keeps the current value.
#[derive(Debug, Default, Clone)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub image_file: Option<String>,
    /// New plain-text password, hashed before it is stored.
    pub password: Option<String>,
    pub is_admin: Option<bool>,
}

impl UserChanges {
    fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.image_file.is_none()
            && self.password.is_none()
            && self.is_admin.is_none()
    }
}

fn conflict(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("That username or email is taken. Please choose a different one.".to_string())
        }
        other => AppError::from(other),
    }
}

#[derive(Clone)]
pub struct UserService {
    dao: UserDao,
}

impl UserService {
    pub fn new(dao: UserDao) -> Self {
        Self { dao }
    }

    pub fn dao(&self) -> &UserDao {
        &self.dao
    }

    pub async fn create_user(&self, username: &str, email: &str, password: &str) -> AppResult<User> {
        let username = username.trim();
        let email = email.trim().to_lowercase();
        NewUser {
            username: username.to_string(),
            email: email.clone(),
            password: password.to_string(),
        }
        .validate()?;

        let hash = hash_password(password)?;
        let user = self.dao.add(username, &email, &hash).await.map_err(conflict)?;
        info!(user = user.id, username = %user.username, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> AppResult<User> {
        self.dao
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id} does not exist")))
    }

    pub async fn update_user(&self, user_id: i64, changes: UserChanges) -> AppResult<User> {
        if changes.is_empty() {
            return Err(AppError::BadRequest("nothing to update".to_string()));
        }

        let mut user = self.get_user(user_id).await?;
        if let Some(username) = changes.username {
            user.username = username.trim().to_string();
        }
        if let Some(email) = changes.email {
            user.email = email.trim().to_lowercase();
        }
        if let Some(image_file) = changes.image_file {
            user.image_file = image_file;
        }
        if let Some(is_admin) = changes.is_admin {
            user.is_admin = is_admin;
        }

        NewUser {
            username: user.username.clone(),
            email: user.email.clone(),
            password: changes.password.clone().unwrap_or_else(|| "unchanged".to_string()),
        }
        .validate()?;
        if let Some(password) = &changes.password {
            user.password_hash = hash_password(password)?;
        }

        self.dao.update(&user).await.map_err(conflict)?;
        info!(user = user.id, "User updated");
        Ok(user)
    }

    /// Grant admin rights to the accounts with these e-mails. Unknown
    /// addresses are skipped.
    pub async fn promote_admins(&self, emails: &[String]) -> AppResult<usize> {
        let mut promoted = 0;
        for email in emails {
            match self.dao.get_by_email(email.trim()).await? {
                Some(user) if !user.is_admin => {
                    self.dao.set_admin(user.id, true).await?;
                    info!(user = user.id, "User promoted to admin");
                    promoted += 1;
                }
                Some(_) => {}
                None => warn!(email = %email, "Admin e-mail has no account"),
            }
        }
        Ok(promoted)
    }

    pub async fn delete_user(&self, user_id: i64) -> AppResult<()> {
        if !self.dao.delete(user_id).await? {
            return Err(AppError::NotFound(format!("user {user_id} does not exist")));
        }
        info!(user = user_id, "User deleted");
        Ok(())
    }
}
