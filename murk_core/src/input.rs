/// A fuzz input. The engine never looks inside one; it only needs the raw bytes.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;

    /// Lowercase hex of the raw bytes, as written into crash reports.
    fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn vec_u8_impl_input() {
        let data: Vec<u8> = vec![1, 2, 3];
        let empty_data: Vec<u8> = vec![];
        assert_eq!(data.as_bytes(), &[1, 2, 3]);
        assert_eq!(Input::len(&data), 3);
        assert!(!Input::is_empty(&data));
        assert!(Input::is_empty(&empty_data));
    }

    #[test]
    fn to_hex_renders_every_byte() {
        let data: Vec<u8> = vec![0x00, 0x7f, 0xff, b'{'];
        assert_eq!(data.to_hex(), "007fff7b");
        assert_eq!(Vec::<u8>::new().to_hex(), "");
    }
}
