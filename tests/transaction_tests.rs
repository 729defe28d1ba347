//! Integration tests for units of work
//!
//! These tests drive `Transaction` end to end against real databases:
//! - changed-row counts and generated ids
//! - row iteration on empty and non-empty tables
//! - commit/rollback of the shared database-level transaction
//! - the `UnitOfWork` trait object surface

#[cfg(test)]
mod tests {
    use sql3wrap::{Connection, Registry, Transaction, TransactionState, UnitOfWork, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    /// Opens an isolated in-memory connection with a `title` table.
    fn title_db() -> Connection {
        init_tracing();
        let mut conn = Connection::with_registry(Arc::new(Registry::new()));
        conn.connect(":memory:").unwrap();
        conn.execute_batch(
            "CREATE TABLE title (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, plays INTEGER DEFAULT 0);",
        )
        .unwrap();
        conn
    }

    fn count_titles(conn: &Connection) -> i64 {
        let mut trx = Transaction::new(conn);
        trx.prepare("SELECT COUNT(*) FROM title").unwrap();
        assert!(trx.execute().unwrap());
        let n = trx.colint(0);
        trx.finish().unwrap();
        n
    }

    #[test]
    fn test_affected_rows_per_insert_and_bulk_update() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);

        trx.prepare("INSERT INTO title (title) VALUES (?)").unwrap();
        for i in 0..10 {
            trx.bind(format!("Track {}", i)).unwrap();
            assert!(!trx.execute().unwrap());
            assert_eq!(trx.affectedrows(), 1);
        }

        trx.prepare("UPDATE title SET plays = plays + 1").unwrap();
        assert!(!trx.execute().unwrap());
        assert_eq!(trx.affectedrows(), 10);
        trx.finish().unwrap();

        assert_eq!(count_titles(&conn), 10);
    }

    #[test]
    fn test_lastid_increases_from_one() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);
        trx.prepare("INSERT INTO title (title) VALUES (?)").unwrap();

        for expected in 1..=10 {
            trx.bind("Song").unwrap().execute().unwrap();
            assert_eq!(trx.lastid().unwrap(), expected);
        }
        trx.finish().unwrap();
    }

    #[test]
    fn test_lastid_without_autoincrement() {
        let conn = title_db();
        conn.execute_batch("CREATE TABLE plain (name TEXT)").unwrap();

        let mut trx = Transaction::new(&conn);
        trx.prepare("INSERT INTO plain (name) VALUES (?)").unwrap();
        trx.bind("first").unwrap().execute().unwrap();
        trx.bind("second").unwrap().execute().unwrap();
        assert_eq!(trx.lastid().unwrap(), 2);
    }

    #[test]
    fn test_empty_table_select() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);

        trx.prepare("SELECT id, title FROM title").unwrap();
        assert!(!trx.execute().unwrap());

        trx.prepare("SELECT COUNT(*) FROM title").unwrap();
        assert!(trx.execute().unwrap());
        assert_eq!(trx.colint(0), 0);
        assert!(!trx.execute().unwrap());
    }

    #[test]
    fn test_readback_columns() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);
        trx.prepare("INSERT INTO title (title, plays) VALUES (?, ?)").unwrap();
        trx.bind("Heroes").unwrap().bind(7i64).unwrap().execute().unwrap();
        trx.bind("Changes").unwrap().bind(3).unwrap().execute().unwrap();

        trx.prepare("SELECT id, title, plays * 1.5 FROM title ORDER BY id").unwrap();
        let mut rows = Vec::new();
        while trx.execute().unwrap() {
            rows.push((trx.colint(0), trx.colstr(1), trx.coldouble(2)));
        }
        assert_eq!(
            rows,
            vec![(1, "Heroes".to_string(), 10.5), (2, "Changes".to_string(), 4.5)]
        );
    }

    #[test]
    fn test_transactions_share_uncommitted_rows() {
        let conn = title_db();
        let mut writer = Transaction::new(&conn);
        let mut reader = Transaction::new(&conn);

        writer.prepare("INSERT INTO title (title) VALUES ('uncommitted')").unwrap();
        writer.execute().unwrap();
        assert!(conn.in_transaction().unwrap());

        reader.prepare("SELECT title FROM title").unwrap();
        assert!(reader.execute().unwrap());
        assert_eq!(reader.colstr(0), "uncommitted");
        reader.finish().unwrap();

        // finishing the reader committed the shared transaction
        assert!(!conn.in_transaction().unwrap());
        writer.finish().unwrap();
        assert_eq!(count_titles(&conn), 1);
    }

    /// Inserts `n` titles through a unit of work and then fails it.
    fn insert_and_fail(uow: &mut dyn UnitOfWork, n: i64) {
        uow.prepare("INSERT INTO title (title) VALUES (?)").unwrap();
        for i in 0..n {
            uow.bind_value(Value::from(format!("doomed {}", i))).unwrap();
            uow.execute().unwrap();
        }
        assert!(uow.prepare("INSERT INTO missing_table VALUES (1)").is_err());
        uow.finish().unwrap();
    }

    #[test]
    fn test_failed_unit_of_work_rolls_back() {
        let conn = title_db();
        {
            let mut uow: Box<dyn UnitOfWork> = Box::new(Transaction::new(&conn));
            uow.prepare("INSERT INTO title (title) VALUES (?)").unwrap();
            for i in 0..10 {
                uow.bind_value(Value::from(format!("kept {}", i))).unwrap();
                uow.execute().unwrap();
            }
            uow.finish().unwrap();
        }
        assert_eq!(count_titles(&conn), 10);

        let mut doomed = Transaction::new(&conn);
        insert_and_fail(&mut doomed, 5);
        assert_eq!(doomed.state(), TransactionState::Finished);
        assert_eq!(count_titles(&conn), 10);

        let mut readback = Transaction::new(&conn);
        readback.prepare("SELECT title FROM title ORDER BY id").unwrap();
        let mut titles = Vec::new();
        while readback.execute().unwrap() {
            titles.push(readback.colstr(0));
        }
        assert_eq!(titles.len(), 10);
        assert!(titles.iter().all(|t| t.starts_with("kept")));
    }

    #[test]
    fn test_errored_unit_of_work_is_sticky() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);
        trx.prepare("INSERT INTO title (title) VALUES (NULL)").unwrap();
        let err = trx.execute().unwrap_err();
        assert!(err.to_string().contains("NOT NULL"), "{}", err);
        assert_eq!(trx.state(), TransactionState::Errored);

        let err = trx.prepare("SELECT 1").map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("error state"));

        trx.finish().unwrap();
        trx.prepare("SELECT COUNT(*) FROM title").unwrap();
        assert!(trx.execute().unwrap());
        assert_eq!(trx.colint(0), 0);
    }

    #[test]
    fn test_drop_commits_and_file_persists() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("songs.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE title (title TEXT)").unwrap();
            let mut trx = Transaction::new(&conn);
            trx.prepare("INSERT INTO title VALUES (?)").unwrap();
            trx.bind("Ziggy").unwrap().execute().unwrap();
        }

        let check = rusqlite::Connection::open(&path).unwrap();
        let n: i64 = check
            .query_row("SELECT COUNT(*) FROM title", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_finished_transaction_can_be_reused() {
        let conn = title_db();
        let mut trx = Transaction::new(&conn);
        for round in 1..=3 {
            trx.prepare("INSERT INTO title (title) VALUES ('again')").unwrap();
            trx.execute().unwrap();
            assert_eq!(trx.lastid().unwrap(), round);
            trx.finish().unwrap();
            assert_eq!(trx.state(), TransactionState::Finished);
        }
        assert_eq!(count_titles(&conn), 3);
    }
}
