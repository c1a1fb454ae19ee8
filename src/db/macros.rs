//! Driver dispatch macro.
//!
//! A live connection is a `(Driver, DbPool)` pair whose variants must agree.
//! The macro expands one match arm per backend so the caller writes the
//! operation once.

/// Dispatch an operation over a matching `(Driver, DbPool)` pair.
///
/// A pair whose variants disagree evaluates the `mismatch` expression, or
/// returns a `DbError::Internal` when none is given.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(self, pool, |driver, p| driver.list_schemas(p).await)
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($driver:expr, $pool:expr, |$d:ident, $p:ident| $body:expr, mismatch => $fallback:expr) => {
        match ($driver, $pool) {
            ($crate::db::driver::Driver::Postgres($d), $crate::db::driver::DbPool::Postgres($p)) => {
                $body
            }
            ($crate::db::driver::Driver::MySql($d), $crate::db::driver::DbPool::MySql($p)) => $body,
            (
                $crate::db::driver::Driver::SqlServer($d),
                $crate::db::driver::DbPool::SqlServer($p),
            ) => $body,
            ($crate::db::driver::Driver::SQLite($d), $crate::db::driver::DbPool::SQLite($p)) => $body,
            _ => $fallback,
        }
    };
    ($driver:expr, $pool:expr, |$d:ident, $p:ident| $body:expr) => {
        $crate::impl_db_dispatch!($driver, $pool, |$d, $p| $body, mismatch => {
            Err($crate::db::driver::pool_mismatch($driver, $pool))
        })
    };
}

pub use impl_db_dispatch;
