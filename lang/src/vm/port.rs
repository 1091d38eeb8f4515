use std::fmt;
use std::io::{self, BufRead, Cursor, Read, Write};

/// A byte-stream handle. Concrete backings beyond in-memory strings are
/// supplied by the host as boxed readers and writers.
pub enum Port {
    Input(Box<dyn BufRead>),
    Output(Box<dyn Write>),
    InputString(Cursor<Vec<u8>>),
    OutputString(Vec<u8>),
    /// A port whose backing was released, such as a pipe after its process ended.
    Closed,
}

impl Port {
    pub fn input(reader: impl BufRead + 'static) -> Self {
        Port::Input(Box::new(reader))
    }

    pub fn output(writer: impl Write + 'static) -> Self {
        Port::Output(Box::new(writer))
    }

    pub fn input_string(bytes: Vec<u8>) -> Self {
        Port::InputString(Cursor::new(bytes))
    }

    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = match self {
            Port::Input(reader) => reader.read(&mut byte)?,
            Port::InputString(cursor) => cursor.read(&mut byte)?,
            _ => return Err(not_for(self, "reading")),
        };
        Ok((n == 1).then_some(byte[0]))
    }

    /// Reads up to the next newline, which is consumed but not returned.
    /// `None` means end of input with nothing read.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let n = match self {
            Port::Input(reader) => reader.read_until(b'\n', &mut line)?,
            Port::InputString(cursor) => cursor.read_until(b'\n', &mut line)?,
            _ => return Err(not_for(self, "reading")),
        };
        if n == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    pub fn write_string(&mut self, s: &str) -> io::Result<()> {
        self.write_all(s.as_bytes())
    }

    /// Writes the whole buffer, retrying partial writes.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Port::Output(writer) => {
                writer.write_all(bytes)?;
                writer.flush()
            }
            Port::OutputString(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(not_for(self, "writing")),
        }
    }

    pub fn output_bytes(&self) -> Option<&[u8]> {
        match self {
            Port::OutputString(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Releases the backing stream; later reads and writes fail.
    pub fn close(&mut self) {
        if let Port::Output(writer) = self {
            let _ = writer.flush();
        }
        *self = Port::Closed;
    }

    fn kind(&self) -> &'static str {
        match self {
            Port::Input(_) => "input",
            Port::Output(_) => "output",
            Port::InputString(_) => "input-string",
            Port::OutputString(_) => "output-string",
            Port::Closed => "closed",
        }
    }
}

fn not_for(port: &Port, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} port not open for {what}", port.kind()),
    )
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ports_read_bytes_and_lines() {
        let mut port = Port::input_string("ab\ncd".as_bytes().to_vec());
        assert_eq!(port.read_byte().unwrap(), Some(b'a'));
        assert_eq!(port.read_line().unwrap().as_deref(), Some("b"));
        assert_eq!(port.read_line().unwrap().as_deref(), Some("cd"));
        assert_eq!(port.read_line().unwrap(), None);
        assert_eq!(port.read_byte().unwrap(), None);
    }

    #[test]
    fn output_string_collects_writes() {
        let mut port = Port::OutputString(Vec::new());
        port.write_string("hé").unwrap();
        port.write_byte(b'!').unwrap();
        assert_eq!(port.output_bytes(), Some("hé!".as_bytes()));
        assert!(port.read_byte().is_err());
    }

    #[test]
    fn closed_port_rejects_io() {
        let mut port = Port::OutputString(Vec::new());
        port.close();
        assert!(port.write_byte(1).is_err());
        assert!(port.output_bytes().is_none());
    }
}
