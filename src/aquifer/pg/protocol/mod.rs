mod auth;
mod message;
mod message_builder;
pub(crate) mod message_parser;
mod message_reader;
mod row_description;
mod server_error;
pub mod sqlstate;
mod tag;

pub use self::auth::{hash_md5_password, unsupported_auth_error, AuthRequest};
pub use self::message::Message;
pub use self::message_builder::MessageBuilder;
pub use self::message_parser::{Header, MessageParser};
pub use self::message_reader::MessageReader;
pub use self::row_description::{parse_row_description, Column};
pub use self::server_error::ServerErrorDetail;
pub use self::sqlstate::SqlStateClass;
pub use self::tag::{Tag, PROTOCOL_VERSION, SSL_ALLOWED, SSL_NOT_ALLOWED, SSL_REQUEST};
