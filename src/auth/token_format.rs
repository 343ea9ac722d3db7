//! API token string format: `API-TOK_` followed by five hyphen-separated
//! groups of four alphanumeric characters.

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

pub const TOKEN_PREFIX: &str = "API-TOK_";
const GROUPS: usize = 5;
const GROUP_LEN: usize = 4;

/// Generate a fresh token from the operating system RNG.
pub fn generate_api_token() -> String {
    let raw: Vec<char> =
        OsRng.sample_iter(&Alphanumeric).take(GROUPS * GROUP_LEN).map(char::from).collect();

    let groups: Vec<String> =
        raw.chunks(GROUP_LEN).map(|group| group.iter().collect::<String>()).collect();

    format!("{}{}", TOKEN_PREFIX, groups.join("-"))
}

/// Whether `value` has the shape produced by [`generate_api_token`].
pub fn looks_like_api_token(value: &str) -> bool {
    let Some(body) = value.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };
    let groups: Vec<&str> = body.split('-').collect();
    groups.len() == GROUPS
        && groups
            .iter()
            .all(|g| g.len() == GROUP_LEN && g.chars().all(|c| c.is_ascii_alphanumeric()))
}
