#[path = "stress/multi_user.rs"]
mod multi_user;
