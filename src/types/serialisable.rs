/// Types implementing WireSerialisable can be written back to a client over the
/// line protocol connection.
pub trait WireSerialisable {
    /// Converts the value in question to its on-the-wire reply, including the
    /// trailing CRLF.
    fn serialise_wire(&self) -> Vec<u8>;
}
