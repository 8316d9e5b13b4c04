use serde::{Deserialize, Serialize};
use sqlx::types::Json;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    pub fn bounds(&self) -> (i64, i64) {
        page_bounds(self.limit, self.offset)
    }
}

pub fn page_bounds(limit: Option<u32>, offset: Option<u32>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE) as i64;
    let offset = offset.unwrap_or(0) as i64;
    (limit, offset)
}

/// Trims labels, drops blanks and case-insensitive duplicates, keeping first-seen order.
pub fn normalize_labels(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.to_lowercase()))
        .collect()
}

/// Lower-cased `%q%` for `LIKE ... ESCAPE '\'`, with `\`, `%` and `_` taken literally.
pub fn contains_pattern(q: &str) -> String {
    let mut pattern = String::with_capacity(q.len() + 2);
    pattern.push('%');
    for c in q.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// auth

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub age: Option<i32>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: UserProfile,
}

// users

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub age: Option<i32>,
    pub hobbies: Json<Vec<String>>,
    pub created_at_ms: i64,
}

/// Absent fields are left alone; a blank avatar, bio or location clears it.
#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub age: Option<i32>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

// interests

#[derive(Debug, Deserialize)]
pub struct InterestsRequest {
    #[serde(default)]
    pub hobbies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InterestsResponse {
    pub user_id: i64,
    pub hobbies: Vec<String>,
}

// posts

#[derive(Debug, Deserialize)]
pub struct PostCreateRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub likes: i64,
    pub liked_by_me: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub post_id: i64,
    pub liked: bool,
    pub likes: i64,
}

// friends

#[derive(Debug, Deserialize)]
pub struct FriendRequestCreate {
    pub friend_id: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FriendSummary {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub since_ms: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FriendRequestRow {
    pub id: i64,
    pub requester_id: i64,
    pub requester_name: String,
    pub requester_avatar: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SuggestionCandidate {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub hobbies: Json<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct FriendSuggestion {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub shared_hobbies: Vec<String>,
}

// groups

#[derive(Debug, Deserialize)]
pub struct GroupCreateRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub leader_id: i64,
    pub tags: Json<Vec<String>>,
    pub member_count: i64,
    pub disbanded: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct GroupDiscoverQuery {
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct GroupMemberRow {
    pub user_id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub is_leader: bool,
    pub joined_at_ms: i64,
}

// messages

#[derive(Debug, Deserialize)]
pub struct MessageCreateRequest {
    pub recipient_id: Option<i64>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub created_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_trimmed_and_deduplicated() {
        let raw = vec![
            " Hiking ".to_string(),
            "chess".to_string(),
            "".to_string(),
            "hiking".to_string(),
            "   ".to_string(),
            "Chess".to_string(),
            "board games".to_string(),
        ];
        assert_eq!(
            normalize_labels(raw),
            vec!["Hiking", "chess", "board games"]
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("Ann"), "%ann%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(page_bounds(None, None), (50, 0));
        assert_eq!(page_bounds(Some(1_000), Some(7)), (200, 7));
        assert_eq!(PageQuery { limit: Some(5), offset: None }.bounds(), (5, 0));
    }
}
