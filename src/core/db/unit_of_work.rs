//! Engine-independent unit-of-work interface.
//!
//! Callers that only need prepare/bind/execute/read can hold a
//! `Box<dyn UnitOfWork>` instead of a concrete [`Transaction`].

use super::transaction::Transaction;
use super::value::Value;
use crate::core::Result;

/// A sequence of statements committed or rolled back as one.
pub trait UnitOfWork {
    fn prepare(&mut self, sql: &str) -> Result<()>;
    fn bind_value(&mut self, value: Value) -> Result<()>;
    fn execute(&mut self) -> Result<bool>;

    fn colint(&self, pos: usize) -> i64;
    fn coldouble(&self, pos: usize) -> f64;
    fn colstr(&self, pos: usize) -> String;

    fn affectedrows(&self) -> usize;
    fn lastid(&self) -> Result<i64>;

    fn finish(&mut self) -> Result<()>;
}

impl UnitOfWork for Transaction {
    fn prepare(&mut self, sql: &str) -> Result<()> {
        Transaction::prepare(self, sql).map(|_| ())
    }

    fn bind_value(&mut self, value: Value) -> Result<()> {
        Transaction::bind(self, value).map(|_| ())
    }

    fn execute(&mut self) -> Result<bool> {
        Transaction::execute(self)
    }

    fn colint(&self, pos: usize) -> i64 {
        Transaction::colint(self, pos)
    }

    fn coldouble(&self, pos: usize) -> f64 {
        Transaction::coldouble(self, pos)
    }

    fn colstr(&self, pos: usize) -> String {
        Transaction::colstr(self, pos)
    }

    fn affectedrows(&self) -> usize {
        Transaction::affectedrows(self)
    }

    fn lastid(&self) -> Result<i64> {
        Transaction::lastid(self)
    }

    fn finish(&mut self) -> Result<()> {
        Transaction::finish(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Connection;

    #[test]
    fn test_works_through_trait_object() {
        let conn = Connection::open(":memory:").unwrap();
        let mut uow: Box<dyn UnitOfWork> = Box::new(Transaction::new(&conn));

        uow.prepare("CREATE TABLE test (a INTEGER, b TEXT)").unwrap();
        uow.execute().unwrap();
        uow.prepare("INSERT INTO test (a, b) VALUES (?, ?)").unwrap();
        uow.bind_value(Value::Integer(5)).unwrap();
        uow.bind_value(Value::from("five")).unwrap();
        assert!(!uow.execute().unwrap());
        assert_eq!(uow.affectedrows(), 1);
        assert_eq!(uow.lastid().unwrap(), 1);

        uow.prepare("SELECT a, b, a * 1.5 FROM test").unwrap();
        assert!(uow.execute().unwrap());
        assert_eq!(uow.colint(0), 5);
        assert_eq!(uow.colstr(1), "five");
        assert_eq!(uow.coldouble(2), 7.5);
        uow.finish().unwrap();
    }
}
