use futures::{Stream, StreamExt};

use super::backend::{ClientError, DeltaStream};

/// Incremental UTF-8 decoder for a chunked response body.
///
/// A multi-byte character split across two chunks is held back until the rest
/// of it arrives; invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    decoded.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                        None => {
                            // Incomplete trailing sequence; wait for the next chunk.
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Flushes any dangling partial sequence at end of body.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: Utf8StreamDecoder,
    finished: bool,
}

/// Maps a raw byte stream into a lazy, finite sequence of text deltas.
///
/// A transport error is yielded once and terminates the sequence.
pub(crate) fn decode_text_stream<S, B>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: Utf8StreamDecoder::default(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let text = state.decoder.push(chunk.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), state));
                    }
                }
                Some(Err(source)) => {
                    state.finished = true;
                    let error = ClientError::BodyChunk {
                        stage: "read-chat-body",
                        source,
                    };
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), state));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_character_split_across_chunks_is_emitted_whole() {
        let mut decoder = Utf8StreamDecoder::default();
        let bytes = "30°C".as_bytes();
        // '°' is two bytes (0xC2 0xB0); split between them.
        let (head, tail) = bytes.split_at(3);

        assert_eq!(decoder.push(head), "30");
        assert_eq!(decoder.push(tail), "°C");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8StreamDecoder::default();

        assert_eq!(decoder.push(b"ok\xFFgo"), "ok\u{FFFD}go");
    }

    #[test]
    fn dangling_partial_sequence_is_flushed_lossily() {
        let mut decoder = Utf8StreamDecoder::default();

        assert_eq!(decoder.push(b"rain\xE2\x98"), "rain");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn decoded_stream_concatenates_to_original_text() {
        let text = "Irrigate at dawn: 12mm 💧";
        let chunks = text
            .as_bytes()
            .chunks(3)
            .map(|chunk| Ok::<_, reqwest::Error>(chunk.to_vec()))
            .collect::<Vec<_>>();

        let deltas = decode_text_stream(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        let joined = deltas
            .into_iter()
            .map(|delta| delta.unwrap())
            .collect::<String>();
        assert_eq!(joined, text);
    }
}
