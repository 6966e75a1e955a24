//! Dialect tag and adapter dispatch macro.

use crate::models::EngineKind;

/// SQL dialect spoken by an adapter. MariaDB speaks the MySQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl From<EngineKind> for Dialect {
    fn from(engine: EngineKind) -> Self {
        match engine {
            EngineKind::Postgres => Self::Postgres,
            EngineKind::MySql | EngineKind::MariaDb => Self::MySql,
            EngineKind::Sqlite => Self::Sqlite,
        }
    }
}

/// Macro for generating adapter dispatch match arms.
///
/// Every arm receives the inner adapter bound to the same identifier, so a
/// single body can be written once for all variants.
///
/// # Example
///
/// ```ignore
/// impl_adapter_dispatch!(self, a => a.test_connection().await)
/// ```
#[macro_export]
macro_rules! impl_adapter_dispatch {
    ($adapter:expr, $a:ident => $body:expr) => {
        match $adapter {
            $crate::adapters::Adapter::Postgres($a) => $body,
            $crate::adapters::Adapter::MySql($a) => $body,
            $crate::adapters::Adapter::Sqlite($a) => $body,
            $crate::adapters::Adapter::SqliteRemote($a) => $body,
        }
    };
}

pub use impl_adapter_dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mariadb_speaks_mysql() {
        assert_eq!(Dialect::from(EngineKind::MariaDb), Dialect::MySql);
        assert_eq!(Dialect::from(EngineKind::Postgres), Dialect::Postgres);
        assert_eq!(Dialect::from(EngineKind::Sqlite), Dialect::Sqlite);
    }
}
