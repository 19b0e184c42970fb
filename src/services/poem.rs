use std::sync::Arc;

use rpcduplex::{CallKind, RpcServer, RpcServerError, ServerSession};
use tonic::Status;
use tracing::info;

use super::recv_request;
use crate::proto::poem::{
    GetPoemRequest, Poem, PoemCollection, SERVICE, StreamPoem, UploadPoemResponse, stream_poem,
};
use crate::proto::{Empty, unix_now};
use crate::store::PoemStore;

pub fn register(server: &mut RpcServer, store: Arc<PoemStore>) -> Result<(), RpcServerError> {
    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/GetPoem"),
        CallKind::Unary,
        move |session| get_poem(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/GetPoemStream"),
        CallKind::ServerStreaming,
        move |session| get_poem_stream(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/GetPoemAll"),
        CallKind::Unary,
        move |session| get_poem_all(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/GetPoemAllStream"),
        CallKind::ServerStreaming,
        move |session| get_poem_all_stream(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/UploadPoem"),
        CallKind::Unary,
        move |session| upload_poem(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/BatchUploadPoem"),
        CallKind::Unary,
        move |session| batch_upload_poem(Arc::clone(&s), session),
    )?;

    let s = Arc::clone(&store);
    server.register(
        &format!("/{SERVICE}/UploadPoemStream"),
        CallKind::ClientStreaming,
        move |session| upload_poem_stream(Arc::clone(&s), session),
    )?;

    server.register(
        &format!("/{SERVICE}/BatchUploadPoemStream"),
        CallKind::Bidirectional,
        move |session| batch_upload_poem_stream(Arc::clone(&store), session),
    )?;

    Ok(())
}

fn find(store: &PoemStore, title: &str) -> Result<Poem, Status> {
    store.get(title).map_err(|e| Status::not_found(e.to_string()))
}

fn uploaded(data: Vec<Poem>) -> UploadPoemResponse {
    UploadPoemResponse {
        end_time: unix_now(),
        success: true,
        data,
    }
}

async fn get_poem(
    store: Arc<PoemStore>,
    mut session: ServerSession<GetPoemRequest, Poem>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let poem = find(&store, &request.title)?;
    session.send(&poem).await?;
    Ok(())
}

async fn get_poem_stream(
    store: Arc<PoemStore>,
    mut session: ServerSession<GetPoemRequest, StreamPoem>,
) -> Result<(), Status> {
    let request = recv_request(&mut session).await?;
    let poem = find(&store, &request.title)?;

    for part in StreamPoem::split(&poem) {
        session.send(&part).await?;
    }
    Ok(())
}

async fn get_poem_all(
    store: Arc<PoemStore>,
    mut session: ServerSession<Empty, PoemCollection>,
) -> Result<(), Status> {
    recv_request(&mut session).await?;
    session
        .send(&PoemCollection {
            value: store.list(),
        })
        .await?;
    Ok(())
}

async fn get_poem_all_stream(
    store: Arc<PoemStore>,
    mut session: ServerSession<Empty, Poem>,
) -> Result<(), Status> {
    recv_request(&mut session).await?;
    for poem in store.list() {
        session.send(&poem).await?;
    }
    Ok(())
}

fn store_poem(store: &PoemStore, poem: Poem) -> Result<Poem, Status> {
    if poem.title.is_empty() {
        return Err(Status::invalid_argument("poem has no title"));
    }
    store.upsert(poem.clone());
    info!(title = %poem.title, "Uploaded poem");
    Ok(poem)
}

async fn upload_poem(
    store: Arc<PoemStore>,
    mut session: ServerSession<Poem, UploadPoemResponse>,
) -> Result<(), Status> {
    let poem = recv_request(&mut session).await?;
    let poem = store_poem(&store, poem)?;
    session.send(&uploaded(vec![poem])).await?;
    Ok(())
}

/// Stores every poem of the collection, or none if one lacks a title.
async fn batch_upload_poem(
    store: Arc<PoemStore>,
    mut session: ServerSession<PoemCollection, UploadPoemResponse>,
) -> Result<(), Status> {
    let collection = recv_request(&mut session).await?;
    if collection.value.iter().any(|poem| poem.title.is_empty()) {
        return Err(Status::invalid_argument("poem has no title"));
    }
    let data = collection
        .value
        .into_iter()
        .map(|poem| store_poem(&store, poem))
        .collect::<Result<Vec<_>, _>>()?;
    session.send(&uploaded(data)).await?;
    Ok(())
}

/// Rebuilds a poem from its parts.
#[derive(Debug, Default)]
pub struct PoemAssembler {
    title: Option<String>,
    author: Option<String>,
    contents: Vec<String>,
}

impl PoemAssembler {
    pub fn push(&mut self, part: StreamPoem) -> Result<(), Status> {
        match part.part {
            Some(stream_poem::Part::Title(title)) => self.title = Some(title),
            Some(stream_poem::Part::Author(author)) => self.author = Some(author),
            Some(stream_poem::Part::Content(line)) => self.contents.push(line),
            None => return Err(Status::invalid_argument("poem part is empty")),
        }
        Ok(())
    }

    /// The poem, once every field has arrived.
    pub fn finish(self) -> Result<Poem, Status> {
        let title = self
            .title
            .filter(|title| !title.is_empty())
            .ok_or_else(|| Status::invalid_argument("poem has no title"))?;
        let author = self
            .author
            .ok_or_else(|| Status::invalid_argument("poem has no author"))?;
        if self.contents.is_empty() {
            return Err(Status::invalid_argument("poem has no content"));
        }

        Ok(Poem {
            title,
            author,
            contents: self.contents,
        })
    }
}

async fn upload_poem_stream(
    store: Arc<PoemStore>,
    mut session: ServerSession<StreamPoem, UploadPoemResponse>,
) -> Result<(), Status> {
    let mut assembler = PoemAssembler::default();
    while let Some(part) = session.recv().await? {
        assembler.push(part)?;
    }
    let poem = store_poem(&store, assembler.finish()?)?;
    session.send(&uploaded(vec![poem])).await?;
    Ok(())
}

async fn batch_upload_poem_stream(
    store: Arc<PoemStore>,
    mut session: ServerSession<Poem, UploadPoemResponse>,
) -> Result<(), Status> {
    while let Some(poem) = session.recv().await? {
        store.upsert(poem.clone());
        info!(title = %poem.title, "Uploaded poem");
        session.send(&uploaded(vec![poem])).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poem() -> Poem {
        Poem {
            title: "Quiet Night".to_string(),
            author: "Li Bai".to_string(),
            contents: vec!["line one".to_string(), "line two".to_string()],
        }
    }

    #[test]
    fn test_assembler_rebuilds_split_poem() {
        let mut assembler = PoemAssembler::default();
        for part in StreamPoem::split(&poem()) {
            assembler.push(part).unwrap();
        }
        assert_eq!(assembler.finish().unwrap(), poem());
    }

    #[test]
    fn test_assembler_rejects_incomplete_poem() {
        let mut assembler = PoemAssembler::default();
        assembler.push(StreamPoem::title("Quiet Night")).unwrap();
        assembler.push(StreamPoem::content("line one")).unwrap();

        let err = assembler.finish().unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_assembler_rejects_empty_part() {
        let mut assembler = PoemAssembler::default();
        assert!(assembler.push(StreamPoem { part: None }).is_err());
    }
}
