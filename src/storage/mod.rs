mod feeds;
mod follows;
mod posts;
mod schema;
mod types;
mod users;

pub use schema::Database;
pub use types::{Feed, FeedFollow, InsertOutcome, NewPost, Post, StoreError, User};
