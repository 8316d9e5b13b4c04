mod auth;
mod friends;
mod groups;
mod health;
mod interests;
mod messages;
mod posts;
mod users;

use axum::Router;
use axum::routing::{delete, get, post, put};

use crate::app_state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/users/search", get(users::search_users))
        .route("/api/users/password", post(users::change_password))
        .route("/api/users/me", delete(users::delete_user))
        .route("/api/users/me/interests", put(interests::update_interests))
        .route("/api/users/:user_id/profile", get(users::user_profile))
        .route("/api/users/:user_id/profile", put(users::update_profile))
        .route("/api/users/:user_id/posts", get(posts::list_user_posts))
        .route("/api/users/:user_id/interests", get(interests::user_interests))
        .route("/api/posts", get(posts::list_posts))
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/:post_id", get(posts::post_detail))
        .route("/api/posts/:post_id", delete(posts::delete_post))
        .route("/api/posts/:post_id/like", post(posts::toggle_like))
        .route("/api/friends", get(friends::list_friends))
        .route("/api/friends/requests", get(friends::list_requests))
        .route("/api/friends/requests", post(friends::send_request))
        .route("/api/friends/requests/:requester_id/accept", post(friends::accept_request))
        .route("/api/friends/requests/:requester_id/reject", post(friends::reject_request))
        .route("/api/friends/suggestions", get(friends::suggestions))
        .route("/api/friends/:friend_id", delete(friends::remove_friend))
        .route("/api/groups", get(groups::list_my_groups))
        .route("/api/groups/create", post(groups::create_group))
        .route("/api/groups/discover", get(groups::discover_groups))
        .route("/api/groups/:group_id", get(groups::group_detail))
        .route("/api/groups/:group_id/members", get(groups::list_members))
        .route("/api/groups/:group_id/join", post(groups::join_group))
        .route("/api/groups/:group_id/leave", post(groups::leave_group))
        .route("/api/groups/:group_id/disband", post(groups::disband_group))
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/:user_id", get(messages::conversation))
        .with_state(state)
}
