use std::fmt;

use serde::{Deserialize, Serialize};

pub const SERVICE: &str = "poem.PoemService";

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Poem {
    #[prost(string, tag = "1")]
    pub title: String,
    #[prost(string, tag = "2")]
    pub author: String,
    #[prost(string, repeated, tag = "3")]
    pub contents: Vec<String>,
}

impl fmt::Display for Poem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", self.author)?;
        for line in &self.contents {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetPoemRequest {
    #[prost(string, tag = "1")]
    pub title: String,
}

/// One piece of a poem sent on its own.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamPoem {
    #[prost(oneof = "stream_poem::Part", tags = "1, 2, 3")]
    pub part: Option<stream_poem::Part>,
}

pub mod stream_poem {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Part {
        #[prost(string, tag = "1")]
        Title(String),
        #[prost(string, tag = "2")]
        Author(String),
        #[prost(string, tag = "3")]
        Content(String),
    }
}

impl StreamPoem {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            part: Some(stream_poem::Part::Title(title.into())),
        }
    }

    pub fn author(author: impl Into<String>) -> Self {
        Self {
            part: Some(stream_poem::Part::Author(author.into())),
        }
    }

    pub fn content(line: impl Into<String>) -> Self {
        Self {
            part: Some(stream_poem::Part::Content(line.into())),
        }
    }

    /// Split a poem into its title, its author and one part per line.
    pub fn split(poem: &Poem) -> Vec<StreamPoem> {
        let mut parts = Vec::with_capacity(poem.contents.len() + 2);
        parts.push(Self::title(poem.title.as_str()));
        parts.push(Self::author(poem.author.as_str()));
        parts.extend(poem.contents.iter().map(|line| Self::content(line.as_str())));
        parts
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PoemCollection {
    #[prost(message, repeated, tag = "1")]
    pub value: Vec<Poem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadPoemResponse {
    /// Unix seconds.
    #[prost(int64, tag = "1")]
    pub end_time: i64,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(message, repeated, tag = "3")]
    pub data: Vec<Poem>,
}
