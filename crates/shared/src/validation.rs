use crate::constants::*;

pub fn validate_message_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message content is required".into());
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_group_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Group name is required".into());
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_LENGTH {
        return Err(format!(
            "Group name must be at most {} characters",
            MAX_GROUP_NAME_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_group_description(description: &str) -> Result<(), String> {
    if description.chars().count() > MAX_GROUP_DESCRIPTION_LENGTH {
        return Err(format!(
            "Group description must be at most {} characters",
            MAX_GROUP_DESCRIPTION_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_reaction_type(reaction_type: &str) -> Result<(), String> {
    if reaction_type.is_empty() {
        return Err("Reaction type is required".into());
    }
    if reaction_type.chars().count() > MAX_REACTION_TYPE_LENGTH {
        return Err("Reaction type too long".into());
    }
    // Reaction types are short codes like LIKE or thumbs_up, not free text
    if !reaction_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(
            "Reaction type can only contain letters, numbers, hyphens, and underscores".into(),
        );
    }
    Ok(())
}

pub fn validate_file_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("File key is required for file messages".into());
    }
    if key.len() > MAX_FILE_KEY_LENGTH {
        return Err("File key too long".into());
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err("File key must be a relative object key".into());
    }
    Ok(())
}
