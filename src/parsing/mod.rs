pub mod response;
pub mod segmenter;

pub use response::{parse_response, ParsedResponse};
pub use segmenter::{segment, sentence_at, word_at, SentenceSpan};
