//! Generation of a whole query corpus.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use crate::{
    QuerySpec, Result,
    corpus::CorpusWriter,
    devops::{Devops, QueryType},
};

/// Generates queries of one type with sequential ids, starting at 0
#[derive(Debug)]
pub struct QueryGenerator<D> {
    devops: D,
    query_type: QueryType,
    next_id: u64,
}

impl<D: Devops> QueryGenerator<D> {
    pub fn new(devops: D, query_type: QueryType) -> Self {
        Self {
            devops,
            query_type,
            next_id: 0,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn next_query(&mut self) -> Result<QuerySpec<D::Request>> {
        let query = self.query_type.generate(&mut self.devops)?.with_id(self.next_id);
        self.next_id += 1;
        Ok(query)
    }

    /// Write `count` queries to `out` as JSON Lines, returning the number written
    pub fn write_corpus<W: Write>(&mut self, count: u64, out: W) -> Result<u64>
    where
        D::Request: Serialize,
    {
        let mut writer = CorpusWriter::new(out);
        for _ in 0..count {
            writer.write(&self.next_query()?)?;
        }
        let written = writer.written();
        writer.finish()?;
        info!(query_type = %self.query_type, queries = written, "generated query corpus");
        Ok(written)
    }
}
