use r2d2::ManageConnection;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;

/// r2d2 manager handing out connections to a single SQLite file.
pub struct SqliteConnectionManager {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteConnectionManager {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        // The file must already exist; uploads never create databases
        let conn = Connection::open_with_flags(&self.path, self.flags)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
