use clap::Parser;

/// Parses the process arguments, leaving error reporting to the caller
pub fn parse_args<T: Parser>() -> Result<T, clap::Error> {
    T::try_parse()
}
