use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// The symbols room join codes are drawn from
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Generates a join code of uppercase letters and digits
pub fn random_code(length: usize) -> String {
    let mut rng = thread_rng();

    (0..length)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_join_charset() {
        for _ in 0..100 {
            let code = random_code(6);

            assert_eq!(code.len(), 6);
            assert!(code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }
}
