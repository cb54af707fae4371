use rand::Rng;

use crate::torrent::peer::PeerId;

/// Generates this process's peer id: 20 random alphanumeric bytes, which
/// keeps the id printable and safe to embed in tracker query strings.
pub fn generate_peer_id() -> PeerId {
    let mut rng = rand::thread_rng();
    let mut id = [0u8; 20];
    for byte in id.iter_mut() {
        *byte = rng.sample(rand::distributions::Alphanumeric);
    }
    id
}

/// Renders a peer id for query strings and logs.
pub fn peer_id_display(id: &PeerId) -> String {
    String::from_utf8_lossy(id).into_owned()
}
