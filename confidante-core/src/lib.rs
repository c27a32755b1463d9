pub mod error;
pub mod xml;
pub mod xmpp;

pub mod utils {
    pub mod recorder;
}
