use rpcduplex::{
    CallKind, DuplexOutcome, LocalChannel, Metadata, SessionError, TransportError, drive,
};

use crate::proto::Empty;
use crate::proto::poem::{
    GetPoemRequest, Poem, PoemCollection, SERVICE, StreamPoem, UploadPoemResponse,
};
use crate::services::poem::PoemAssembler;

fn method(name: &str) -> String {
    format!("/{SERVICE}/{name}")
}

/// Typed calls to the poem service.
#[derive(Clone)]
pub struct PoemClient {
    channel: LocalChannel,
}

impl PoemClient {
    pub fn new(channel: LocalChannel) -> Self {
        Self { channel }
    }

    pub async fn get_poem(&self, title: &str) -> Result<Poem, SessionError> {
        let request = GetPoemRequest {
            title: title.to_string(),
        };
        let response = self
            .channel
            .unary(&method("GetPoem"), &request, Metadata::new())
            .await?;
        Ok(response.message)
    }

    /// Fetch a poem sent as separate parts and put it back together.
    pub async fn get_poem_stream(&self, title: &str) -> Result<Poem, SessionError> {
        let request = GetPoemRequest {
            title: title.to_string(),
        };
        let mut session = self
            .channel
            .server_streaming::<GetPoemRequest, StreamPoem>(
                &method("GetPoemStream"),
                &request,
                Metadata::new(),
            )
            .await?;

        let mut assembler = PoemAssembler::default();
        while let Some(part) = session.recv().await? {
            assembler
                .push(part)
                .map_err(|status| SessionError::from_status(&status))?;
        }
        assembler
            .finish()
            .map_err(|status| SessionError::from_status(&status))
    }

    pub async fn get_poem_all(&self) -> Result<Vec<Poem>, SessionError> {
        let response = self
            .channel
            .unary::<Empty, PoemCollection>(&method("GetPoemAll"), &Empty {}, Metadata::new())
            .await?;
        Ok(response.message.value)
    }

    pub async fn get_poem_all_stream(&self) -> Result<Vec<Poem>, SessionError> {
        let mut session = self
            .channel
            .server_streaming::<Empty, Poem>(&method("GetPoemAllStream"), &Empty {}, Metadata::new())
            .await?;

        let mut poems = Vec::new();
        while let Some(poem) = session.recv().await? {
            poems.push(poem);
        }
        Ok(poems)
    }

    pub async fn upload_poem(&self, poem: &Poem) -> Result<UploadPoemResponse, SessionError> {
        let response = self
            .channel
            .unary(&method("UploadPoem"), poem, Metadata::new())
            .await?;
        Ok(response.message)
    }

    /// Upload `poems` in a single request.
    pub async fn batch_upload_poem(
        &self,
        poems: Vec<Poem>,
    ) -> Result<UploadPoemResponse, SessionError> {
        let response = self
            .channel
            .unary(
                &method("BatchUploadPoem"),
                &PoemCollection { value: poems },
                Metadata::new(),
            )
            .await?;
        Ok(response.message)
    }

    /// Upload a poem as its title, its author and one message per line.
    pub async fn upload_poem_stream(&self, poem: &Poem) -> Result<UploadPoemResponse, SessionError> {
        let mut session = self
            .channel
            .open::<StreamPoem, UploadPoemResponse>(
                &method("UploadPoemStream"),
                CallKind::ClientStreaming,
                Metadata::new(),
            )
            .await?;

        let mut sent = Ok(());
        for part in StreamPoem::split(poem) {
            sent = session.send(&part).await;
            if sent.is_err() {
                break;
            }
        }
        if sent.is_ok() {
            sent = session.close_send().await;
        }
        // A server that rejected the upload early has closed the call; its
        // status is read below.
        match sent {
            Ok(()) | Err(SessionError::Transport(TransportError::Closed)) => {}
            Err(err) => return Err(err),
        }

        session
            .recv()
            .await?
            .ok_or_else(|| SessionError::violation("upload ended without a response"))
    }

    /// Upload `poems` on one bidirectional call, handing each acknowledgement
    /// to `after_upload` as it arrives.
    pub async fn batch_upload_poem_stream<F>(
        &self,
        poems: Vec<Poem>,
        after_upload: F,
    ) -> Result<DuplexOutcome, SessionError>
    where
        F: FnMut(UploadPoemResponse) + Send + 'static,
    {
        let session = self
            .channel
            .open::<Poem, UploadPoemResponse>(
                &method("BatchUploadPoemStream"),
                CallKind::Bidirectional,
                Metadata::new(),
            )
            .await?;
        let (sender, receiver) = session.split();
        drive(sender, receiver, poems, after_upload).await
    }
}
