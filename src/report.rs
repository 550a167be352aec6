use std::{
    fmt,
    io::{self, Write},
};

/// Line sink that writes to the console and, optionally, mirrors into a log file.
pub struct Report<C, M> {
    console: C,
    mirror: Option<M>,
}

impl<C: Write, M: Write> Report<C, M> {
    pub fn new(console: C, mirror: Option<M>) -> Self {
        Report { console, mirror }
    }

    /// Writes to both sinks.
    pub fn line(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        writeln!(self.console, "{args}")?;
        if let Some(mirror) = &mut self.mirror {
            writeln!(mirror, "{args}")?;
        }
        Ok(())
    }

    /// Writes to the console only.
    pub fn console(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        writeln!(self.console, "{args}")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        if let Some(mirror) = &mut self.mirror {
            mirror.flush()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (C, Option<M>) {
        (self.console, self.mirror)
    }
}
