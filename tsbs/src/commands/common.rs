use std::{path::Path, str::FromStr};

use anyhow::Context;
use tokio::io::{AsyncBufRead, BufReader};

/// The storage systems the tools can be run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Backend {
    #[default]
    Prometheus,
}

/// Buffered reader over `file`, or over stdin when no file is given
pub(crate) async fn open_input(
    file: Option<&Path>,
) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("error opening {}", path.display()))?;
            Box::new(BufReader::with_capacity(4 << 20, file))
        }
        None => Box::new(BufReader::with_capacity(4 << 20, tokio::io::stdin())),
    })
}

/// A clap argument provided as a list of items separated by `SEPARATOR`, which by default is a ','
#[derive(Debug, Clone)]
pub(crate) struct SeparatedList<T, const SEPARATOR: char = ','>(pub(crate) Vec<T>);

impl<T, const SEPARATOR: char> FromStr for SeparatedList<T, SEPARATOR>
where
    T: FromStr<Err: Into<anyhow::Error>>,
{
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(SEPARATOR)
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<T>().map_err(Into::into))
                .collect::<Result<Vec<T>, Self::Err>>()?,
        ))
    }
}

impl<T, const SEPARATOR: char> IntoIterator for SeparatedList<T, SEPARATOR> {
    type Item = T;

    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn separated_urls() {
        let list: SeparatedList<Url> = "http://a:9090, http://b:9090,".parse().unwrap();
        let hosts: Vec<_> = list
            .into_iter()
            .map(|u| u.host_str().unwrap().to_string())
            .collect();
        assert_eq!(vec!["a", "b"], hosts);
    }

    #[test]
    fn invalid_item_fails_the_list() {
        assert!("http://a:9090,not a url".parse::<SeparatedList<Url>>().is_err());
    }
}
