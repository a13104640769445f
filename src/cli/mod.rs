pub mod args;

use clap::Parser;

pub use args::Arguments;

pub fn parse() -> Arguments {
    Arguments::parse()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Arguments::parse_from(["beast-pipelines", "-i", "aln.fasta", "-t", "template.xml"]);
        assert_eq!(args.prefix, "beast_analysis");
        assert_eq!(args.chain_length, 10_000_000);
        assert_eq!(args.log_every, 1_000);
        assert_eq!(args.screen_every, 10_000);
        assert_eq!(args.burnin, 10);
        assert_eq!(args.max_cpus, 4);
        assert_eq!(args.max_memory.to_string(), "8 GB");
        assert_eq!(args.max_time.duration().as_secs(), 48 * 3600);
        assert_eq!(args.outdir.to_str(), Some("results"));
    }

    #[test]
    fn test_inputs_are_optional_at_parse_time() {
        let args = Arguments::parse_from(["beast-pipelines"]);
        assert!(args.input.is_none());
        assert!(args.template.is_none());
    }

    #[test]
    fn test_tool_override_with_launcher() {
        let args = Arguments::parse_from(["beast-pipelines", "--beast", "java -jar /opt/beast.jar"]);
        assert_eq!(args.beast.program, "java");
        assert_eq!(args.beast.args, vec!["-jar", "/opt/beast.jar"]);
    }
}
