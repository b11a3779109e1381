//! # sqlq — named SQL templates
//!
//! Keep queries as `.sql` files, call them by name with named parameters,
//! and let sqlq cache results and pin calls to explicit transactions.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqlq::prelude::*;
//!
//! let db = SqlqDB::connect(
//!     Config::builder()
//!         .database("postgres://localhost/app")
//!         .sql_directory("sql")
//!         .enable_cache(true)
//!         .build(),
//! )?;
//!
//! // sql/get-one-state.sql: select * from states where code = $code
//! let mut params = Params::new();
//! params.insert("code".into(), "AZ".into());
//! let rows = db.execute("get-one-state", &params, true, None).await?;
//!
//! let mut tx = db.begin_transaction(true).await?;
//! db.execute("insert-row", &params, true, tx.as_mut()).await?;
//! db.commit_transaction(tx, true).await?;
//! ```
//!
//! ## Placeholders
//!
//! | Form     | Meaning                                   |
//! |----------|-------------------------------------------|
//! | `$name`  | Bound parameter, sent as `$1`, `$2`, ...  |
//! | `$$name` | Literal splice, pasted into the SQL text  |

pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod policy;
pub mod render;
pub mod report;
pub mod template;
pub mod value;

pub mod prelude {
    pub use crate::cache::{cache_key, CacheOp, CacheReport, CacheStats};
    pub use crate::config::{Config, LogConfig};
    pub use crate::driver::{Driver, PgDriver, Row, Rows};
    pub use crate::engine::{SqlqDB, Transaction};
    pub use crate::error::*;
    pub use crate::policy::CachePolicy;
    pub use crate::render::Rendered;
    pub use crate::value::{Params, SqlqValue};
}

pub use crate::cache::cache_key;
pub use crate::render::render;
