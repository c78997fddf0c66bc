//! Client-side checks run before login, registration and profile requests.

use serde::Serialize;
use thiserror::Error;

/// Minimum password length accepted at registration
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Username is required.")]
    UsernameRequired,
    #[error("Password is required.")]
    PasswordRequired,
    #[error("Email is required.")]
    EmailRequired,
    #[error("Please enter a valid email.")]
    InvalidEmail,
    #[error("Please confirm your password.")]
    ConfirmationRequired,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters.")]
    PasswordTooShort,
    #[error("No fields to update.")]
    NothingToUpdate,
    #[error("Current password is required to change password.")]
    CurrentPasswordRequired,
}

pub fn validate_login(username: &str, password: &str) -> Result<(), FormError> {
    if username.trim().is_empty() {
        return Err(FormError::UsernameRequired);
    }
    if password.is_empty() {
        return Err(FormError::PasswordRequired);
    }
    Ok(())
}

pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<(), FormError> {
    validate_login(username, password)?;
    if email.trim().is_empty() {
        return Err(FormError::EmailRequired);
    }
    if !looks_like_email(email.trim()) {
        return Err(FormError::InvalidEmail);
    }
    if confirm_password.is_empty() {
        return Err(FormError::ConfirmationRequired);
    }
    if password != confirm_password {
        return Err(FormError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FormError::PasswordTooShort);
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace anywhere.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Raw profile form input. Blank fields mean "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub username: String,
    pub email: String,
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// Body of the profile update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
}

impl ProfileForm {
    pub fn into_update(self) -> Result<ProfileUpdate, FormError> {
        let mut update = ProfileUpdate::default();
        if !self.username.trim().is_empty() {
            update.username = Some(self.username.trim().to_string());
        }
        if !self.email.trim().is_empty() {
            update.email = Some(self.email.trim().to_string());
        }
        if (!self.new_password.is_empty() || !self.confirm_new_password.is_empty())
            && self.new_password != self.confirm_new_password
        {
            return Err(FormError::PasswordMismatch);
        }
        if !self.new_password.trim().is_empty() {
            if self.current_password.is_empty() {
                return Err(FormError::CurrentPasswordRequired);
            }
            update.current_password = Some(self.current_password);
            update.new_password = Some(self.new_password);
        }
        if update == ProfileUpdate::default() {
            return Err(FormError::NothingToUpdate);
        }
        Ok(update)
    }
}
