pub mod conninfo;
mod copy;
mod cursor;
pub mod decode;
mod listener;
pub mod params;
pub mod protocol;
pub mod result;
pub mod row;
pub(crate) mod session;
mod transport;

pub use self::conninfo::Conninfo;
pub use self::copy::CopyOutChunk;
pub use self::decode::{parse_pg_array, FromCell};
pub use self::listener::{Listener, NotificationHandler};
pub use self::params::{collect_params, format_pg_array, Jsonb, Param, ToParam, ToParams};
pub use self::protocol::{Column, ServerErrorDetail, SqlStateClass};
pub use self::result::{
    is_fatal_connection_error, rows_affected_from_tag, CopyResult, CursorChunk, ErrorKind,
    QueryResult,
};
pub use self::row::FromRow;
pub use self::session::{
    map_result, Notification, Session, SessionState, DEFAULT_RECV_BUFFER_SIZE,
};
