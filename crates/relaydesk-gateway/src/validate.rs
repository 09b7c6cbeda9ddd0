use relaydesk_core::{RelayError, Result};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 16;
const PASSWORD_MAX: usize = 128;
const INSTANCE_MAX: usize = 64;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// 用户名：3 到 16 位字母、数字、下划线或连字符
pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) || !username.chars().all(is_name_char) {
        return Err(RelayError::InvalidInput(format!(
            "username must be {}-{} characters of letters, digits, '_' or '-'",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(RelayError::InvalidInput("password must not be empty".into()));
    }
    if password.chars().count() > PASSWORD_MAX {
        return Err(RelayError::InvalidInput(format!(
            "password must be at most {} characters",
            PASSWORD_MAX
        )));
    }
    Ok(())
}

/// 实例标识：字母、数字、下划线、连字符或点
pub fn validate_instance(instance: &str) -> Result<()> {
    let valid = !instance.is_empty()
        && instance.chars().count() <= INSTANCE_MAX
        && instance.chars().all(|c| is_name_char(c) || c == '.');

    if !valid {
        return Err(RelayError::InvalidInput(format!(
            "instance '{}' is not a valid identifier",
            instance
        )));
    }
    Ok(())
}
