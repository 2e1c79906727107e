use clap::Parser;

const CMD_NAME: &str = "hp";
const DEFAULT_OUTPUT: &str = "hp_output";
const DEFAULT_INITIAL_MODEL: &str = "r941_min_snp_g360";
const DEFAULT_REFINEMENT_MODEL: &str = "r941_min_variant_g360";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Aligned reads file (BAM); a companion .bai index must exist
    #[arg(short = 'i', long, value_name = "FILE")]
    pub alignment: String,

    /// Reference sequence (FASTA)
    #[arg(short = 'r', long, value_name = "FILE")]
    pub reference: String,

    /// Restrict calling to a region, e.g. 'chr1:1-1000'
    #[arg(short = 'R', long, value_name = "REGION")]
    pub region: Option<String>,

    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_OUTPUT)]
    #[arg(env = "HAPLOPIPE_OUTPUT")]
    pub output: String,

    /// Model for the initial mixed-pool calling pass
    #[arg(long, value_name = "MODEL", default_value = DEFAULT_INITIAL_MODEL)]
    pub initial_model: String,

    /// Model for the per-haplotype refinement pass
    #[arg(long, value_name = "MODEL", default_value = DEFAULT_REFINEMENT_MODEL)]
    pub refinement_model: String,

    /// Probability threshold for heterozygous calls
    #[arg(short = 't', long, value_name = "FLOAT", default_value_t = 0.04)]
    pub threshold: f64,

    /// Decode refinement calls with the full model instead of threshold calling
    #[arg(long)]
    pub full_model: bool,

    /// Worker threads passed to the calling engine
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub threads: usize,

    /// Inference batch size passed to the calling engine
    #[arg(short = 'b', long, value_name = "N", default_value_t = 100)]
    pub batch_size: usize,

    /// Delete intermediate artifacts after a successful run
    #[arg(short = 'd', long)]
    pub delete_intermediates: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the stage plan but don't modify anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Calling engine executable
    #[arg(long, value_name = "EXE", default_value = "medaka")]
    #[arg(env = "HAPLOPIPE_MEDAKA")]
    pub medaka_exe: String,

    /// Phasing/haplotagging executable
    #[arg(long, value_name = "EXE", default_value = "whatshap")]
    #[arg(env = "HAPLOPIPE_WHATSHAP")]
    pub whatshap_exe: String,

    /// Alignment toolkit executable
    #[arg(long, value_name = "EXE", default_value = "samtools")]
    #[arg(env = "HAPLOPIPE_SAMTOOLS")]
    pub samtools_exe: String,

    /// Compressor executable
    #[arg(long, value_name = "EXE", default_value = "bgzip")]
    #[arg(env = "HAPLOPIPE_BGZIP")]
    pub bgzip_exe: String,

    /// Call-file indexer executable
    #[arg(long, value_name = "EXE", default_value = "tabix")]
    #[arg(env = "HAPLOPIPE_TABIX")]
    pub tabix_exe: String,
}
