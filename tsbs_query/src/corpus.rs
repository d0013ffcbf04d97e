//! Query corpora stored as JSON Lines, one [`QuerySpec`] per line.

use std::{io::Write, marker::PhantomData};

use futures::{Stream, stream};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::{Error, QuerySpec, Result};

/// Appends queries to a corpus
#[derive(Debug)]
pub struct CorpusWriter<W> {
    out: W,
    written: u64,
}

impl<W: Write> CorpusWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write<R: Serialize>(&mut self, query: &QuerySpec<R>) -> Result<()> {
        serde_json::to_writer(&mut self.out, query).map_err(Error::Encode)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Reads queries back from a corpus, skipping blank lines
#[derive(Debug)]
pub struct CorpusReader<B, R> {
    lines: Lines<B>,
    line: u64,
    _request: PhantomData<fn() -> R>,
}

impl<B, R> CorpusReader<B, R>
where
    B: AsyncBufRead + Unpin,
    R: DeserializeOwned,
{
    pub fn new(input: B) -> Self {
        Self {
            lines: input.lines(),
            line: 0,
            _request: PhantomData,
        }
    }

    /// The next query, or `None` at the end of the corpus
    pub async fn next_query(&mut self) -> Result<Option<QuerySpec<R>>> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| Error::Corpus {
                    line: self.line,
                    source,
                });
        }
        Ok(None)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<QuerySpec<R>>> {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_query().await?.map(|query| (query, reader)))
        })
    }
}
