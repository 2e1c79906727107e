use crate::artifact::{Artifact, ArtifactKind, ArtifactStore};
use crate::settings::{DecodeMode, Settings};
use crate::stage::Stage;
use crate::tools::{ConsensusOptions, TagFilter, Toolchain};

/// Tag name written by the haplotagger and filtered on in round 1.
pub const TAG_NAME: &str = "HP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Haplotype {
    H1,
    H2,
}

impl Haplotype {
    pub const BOTH: [Haplotype; 2] = [Haplotype::H1, Haplotype::H2];

    fn tag_value(self) -> u8 {
        match self {
            Self::H1 => 1,
            Self::H2 => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::H1 => "hap1",
            Self::H2 => "hap2",
        }
    }
}

/// How a calling pass decodes consensus probabilities into calls.
#[derive(Debug, Clone, Copy)]
enum Decode {
    Threshold(f64),
    FullModel,
}

/// One calling pass: consensus-probability generation plus decoding,
/// parameterized by round, model, decode mode and tag restriction.
/// Round 0 instantiates one mixed-pool pass; round 1 instantiates one pass
/// per haplotype plus a merge, so the topology is data rather than
/// duplicated control flow.
struct CallingPass<'a> {
    round: usize,
    tag: Option<Haplotype>,
    model: &'a str,
    decode: Decode,
}

fn tag_label(tag: Option<Haplotype>) -> &'static str {
    match tag {
        None => "mixed",
        Some(hap) => hap.label(),
    }
}

/// The materialized, ordered stage sequence for one pipeline run.
///
/// The topology is fixed: round 0 calls the mixed read pool, phases the
/// result and haplotags the alignment; round 1 re-calls each haplotype
/// separately and merges the two call sets into a phased diploid set.
/// Stages execute strictly in this order; there is no independent-stage
/// parallelism to exploit since each stage feeds the next.
pub struct StageGraph {
    stages: Vec<Stage>,
    finals: Vec<Artifact>,
}

impl StageGraph {
    /// Expand the two-round topology into concrete stages. Artifact names
    /// derive only from round index, haplotype tag and kind, so identical
    /// settings always map to identical names and skip logic lines up
    /// across re-invocations.
    pub fn build(settings: &Settings, tools: &Toolchain, store: &ArtifactStore) -> Self {
        let mut stages = Vec::with_capacity(12);

        let reference = Artifact::new(
            "reference sequence",
            settings.reference.clone(),
            ArtifactKind::Reference,
        );
        let source = Artifact::new(
            "source alignment",
            settings.alignment.clone(),
            ArtifactKind::Alignment,
        );

        // with a region configured, all downstream stages consume a
        // restricted copy of the alignment instead of the source
        let calling_alignment = if let Some(region) = &settings.region {
            let restricted = Artifact::new(
                "round 0 restricted alignment",
                "round_0_mixed.bam",
                ArtifactKind::Alignment,
            );
            stages.push(
                Stage::new(
                    "extract-region",
                    vec![source.clone()],
                    vec![restricted.clone()],
                    tools.extract_region(
                        &store.resolve(&source),
                        region,
                        &store.resolve(&restricted),
                    ),
                )
                .with_index_cmd(tools.index_alignment(&store.resolve(&restricted))),
            );
            restricted
        } else {
            source
        };

        // round 0: mixed-pool consensus and threshold calling
        let round0 = CallingPass {
            round: 0,
            tag: None,
            model: &settings.initial_model,
            decode: Decode::Threshold(settings.threshold),
        };
        let unphased = push_calling_stages(
            &mut stages,
            settings,
            tools,
            store,
            &calling_alignment,
            &reference,
            &round0,
        );

        let phased = Artifact::new(
            "round 0 phased calls",
            "round_0_mixed_phased.vcf",
            ArtifactKind::Calls,
        );
        stages.push(Stage::new(
            "phase",
            vec![
                reference.clone(),
                unphased.clone(),
                calling_alignment.clone(),
            ],
            vec![phased.clone()],
            tools.phase(
                &store.resolve(&reference),
                &store.resolve(&unphased),
                &store.resolve(&calling_alignment),
                &store.resolve(&phased),
            ),
        ));

        let phased_gz = Artifact::new(
            "round 0 phased calls (compressed)",
            "round_0_mixed_phased.vcf.gz",
            ArtifactKind::CompressedCalls,
        );
        stages.push(
            Stage::new(
                "compress-phased",
                vec![phased.clone()],
                vec![phased_gz.clone()],
                tools.compress(&store.resolve(&phased), &store.resolve(&phased_gz)),
            )
            .with_index_cmd(tools.index_calls(&store.resolve(&phased_gz))),
        );

        let tagged = Artifact::new(
            "round 0 tagged alignment",
            "round_0_mixed_tagged.bam",
            ArtifactKind::Alignment,
        );
        stages.push(
            Stage::new(
                "haplotag",
                vec![
                    reference.clone(),
                    phased_gz.clone(),
                    calling_alignment.clone(),
                ],
                vec![tagged.clone()],
                tools.haplotag(
                    &store.resolve(&reference),
                    &store.resolve(&phased_gz),
                    &store.resolve(&calling_alignment),
                    &store.resolve(&tagged),
                ),
            )
            .with_index_cmd(tools.index_alignment(&store.resolve(&tagged))),
        );

        // round 1: per-haplotype refinement over the tagged alignment
        let refine_decode = match settings.decode {
            DecodeMode::Threshold => Decode::Threshold(settings.threshold),
            DecodeMode::FullModel => Decode::FullModel,
        };
        let mut hap_calls = Vec::with_capacity(2);
        for hap in Haplotype::BOTH {
            let pass = CallingPass {
                round: 1,
                tag: Some(hap),
                model: &settings.refinement_model,
                decode: refine_decode,
            };
            hap_calls.push(push_calling_stages(
                &mut stages,
                settings,
                tools,
                store,
                &tagged,
                &reference,
                &pass,
            ));
        }

        let diploid = Artifact::new(
            "round 1 diploid calls",
            "round_1_diploid.vcf",
            ArtifactKind::Calls,
        );
        stages.push(Stage::new(
            "merge-diploid",
            vec![hap_calls[0].clone(), hap_calls[1].clone(), reference.clone()],
            vec![diploid.clone()],
            tools.merge_haplotypes(
                &store.resolve(&hap_calls[0]),
                &store.resolve(&hap_calls[1]),
                &store.resolve(&reference),
                &store.resolve(&diploid),
            ),
        ));

        let diploid_gz = Artifact::new(
            "round 1 diploid calls (compressed)",
            "round_1_diploid.vcf.gz",
            ArtifactKind::CompressedCalls,
        );
        stages.push(
            Stage::new(
                "compress-diploid",
                vec![diploid.clone()],
                vec![diploid_gz.clone()],
                tools.compress(&store.resolve(&diploid), &store.resolve(&diploid_gz)),
            )
            .with_index_cmd(tools.index_calls(&store.resolve(&diploid_gz))),
        );

        let finals = vec![unphased, diploid_gz];
        Self { stages, finals }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The two artifacts that survive intermediate cleanup: the round-0
    /// unphased calls and the round-1 compressed diploid calls.
    pub fn final_outputs(&self) -> &[Artifact] {
        &self.finals
    }

    /// Every artifact any stage produces, companion indexes included.
    pub fn all_outputs(&self) -> Vec<Artifact> {
        let mut outputs = Vec::with_capacity(self.stages.len() * 2);
        for stage in &self.stages {
            for out in &stage.outputs {
                if let Some(index) = out.index_companion() {
                    outputs.push(index);
                }
                outputs.push(out.clone());
            }
        }
        outputs
    }
}

/// Expand one calling pass into its consensus and decode stages; returns
/// the call-set artifact the pass produces.
fn push_calling_stages(
    stages: &mut Vec<Stage>,
    settings: &Settings,
    tools: &Toolchain,
    store: &ArtifactStore,
    alignment: &Artifact,
    reference: &Artifact,
    pass: &CallingPass,
) -> Artifact {
    let label = tag_label(pass.tag);

    let probs = Artifact::new(
        format!("round {} {} consensus probabilities", pass.round, label),
        format!("round_{}_{}_probs.hdf", pass.round, label),
        ArtifactKind::ProbabilityStore,
    );
    let opts = ConsensusOptions {
        model: pass.model.to_owned(),
        threads: settings.threads,
        batch_size: settings.batch_size,
        region: settings.region.clone(),
        // unassigned reads stay in play as mixed evidence for either haplotype
        tag_filter: pass.tag.map(|hap| TagFilter {
            name: TAG_NAME,
            value: hap.tag_value(),
            keep_missing: true,
        }),
    };
    stages.push(Stage::new(
        format!("consensus-{label}"),
        vec![alignment.clone()],
        vec![probs.clone()],
        tools.consensus(&store.resolve(alignment), &store.resolve(&probs), &opts),
    ));

    // round 0 calls feed the phaser, so they are named for what they are
    let calls = if pass.round == 0 {
        Artifact::new(
            format!("round {} {} unphased calls", pass.round, label),
            format!("round_{}_{}_unphased.vcf", pass.round, label),
            ArtifactKind::Calls,
        )
    } else {
        Artifact::new(
            format!("round {} {} calls", pass.round, label),
            format!("round_{}_{}_calls.vcf", pass.round, label),
            ArtifactKind::Calls,
        )
    };
    let invocation = match pass.decode {
        Decode::Threshold(threshold) => tools.threshold_call(
            &store.resolve(reference),
            &store.resolve(&probs),
            &store.resolve(&calls),
            threshold,
            settings.region.as_deref(),
        ),
        Decode::FullModel => tools.full_call(
            &store.resolve(reference),
            &store.resolve(&probs),
            &store.resolve(&calls),
            settings.region.as_deref(),
        ),
    };
    stages.push(Stage::new(
        format!("call-{label}"),
        vec![reference.clone(), probs.clone()],
        vec![calls.clone()],
        invocation,
    ));

    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DecodeMode, ToolExes};
    use std::path::PathBuf;

    fn make_settings(region: Option<&str>) -> Settings {
        Settings {
            alignment: PathBuf::from("/data/reads.bam"),
            reference: PathBuf::from("/data/ref.fa"),
            region: region.map(str::to_owned),
            output: PathBuf::from("/out"),
            initial_model: "m0".to_owned(),
            refinement_model: "m1".to_owned(),
            threshold: 0.1,
            decode: DecodeMode::Threshold,
            threads: 1,
            batch_size: 100,
            delete_intermediates: false,
            verbose: 0,
            dry_run: false,
            tools: ToolExes {
                medaka: "medaka".to_owned(),
                whatshap: "whatshap".to_owned(),
                samtools: "samtools".to_owned(),
                bgzip: "bgzip".to_owned(),
                tabix: "tabix".to_owned(),
            },
        }
    }

    fn build(settings: &Settings) -> StageGraph {
        let tools = Toolchain::new(&settings.tools);
        let store = ArtifactStore::new(&settings.output);
        StageGraph::build(settings, &tools, &store)
    }

    fn stage_names(graph: &StageGraph) -> Vec<&str> {
        graph.stages().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_topology_without_region() {
        let graph = build(&make_settings(None));
        assert_eq!(
            stage_names(&graph),
            vec![
                "consensus-mixed",
                "call-mixed",
                "phase",
                "compress-phased",
                "haplotag",
                "consensus-hap1",
                "call-hap1",
                "consensus-hap2",
                "call-hap2",
                "merge-diploid",
                "compress-diploid",
            ]
        );
    }

    #[test]
    fn test_region_adds_extract_stage_and_threads_region_through() {
        let graph = build(&make_settings(Some("chr1:1-1000")));
        let names = stage_names(&graph);
        assert_eq!(names[0], "extract-region");
        assert_eq!(names.len(), 12);

        for stage in graph.stages() {
            let line = stage.command_line();
            if line.contains("consensus") || line.contains("snp") || line.contains("variant") {
                assert!(
                    line.contains("chr1:1-1000"),
                    "stage '{}' should carry the region: {line}",
                    stage.name
                );
            }
        }

        // downstream stages consume the restricted alignment, not the source
        let consensus = &graph.stages()[1];
        assert!(consensus.command_line().contains("round_0_mixed.bam"));
        assert!(!consensus.command_line().contains("/data/reads.bam"));
    }

    #[test]
    fn test_naming_is_deterministic() {
        let settings = make_settings(Some("chr2:5-50"));
        let a = build(&settings);
        let b = build(&settings);
        let render = |g: &StageGraph| {
            g.stages()
                .iter()
                .map(|s| {
                    let outs: Vec<_> =
                        s.outputs.iter().map(|o| o.location.clone()).collect();
                    format!("{}: {} -> {outs:?}", s.name, s.command_line())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn test_refinement_passes_filter_tags_and_keep_missing() {
        let graph = build(&make_settings(None));
        let hap_consensus: Vec<_> = graph
            .stages()
            .iter()
            .filter(|s| s.name.starts_with("consensus-hap"))
            .collect();
        assert_eq!(hap_consensus.len(), 2);
        for (stage, value) in hap_consensus.iter().zip(["1", "2"]) {
            let line = stage.command_line();
            assert!(line.contains(&format!("--tag_name HP --tag_value {value}")));
            assert!(line.contains("--tag_keep_missing"));
            assert!(line.contains("round_0_mixed_tagged.bam"));
        }
    }

    #[test]
    fn test_full_model_decode_drops_threshold_in_round_1_only() {
        let mut settings = make_settings(None);
        settings.decode = DecodeMode::FullModel;
        let graph = build(&settings);

        let find = |name: &str| {
            graph
                .stages()
                .iter()
                .find(|s| s.name == name)
                .map(Stage::command_line)
                .unwrap()
        };
        assert!(find("call-mixed").contains("--threshold 0.1"));
        assert!(find("call-hap1").contains("variant"));
        assert!(!find("call-hap1").contains("--threshold"));
        assert!(!find("call-hap2").contains("--threshold"));
    }

    #[test]
    fn test_final_outputs() {
        let graph = build(&make_settings(None));
        let finals: Vec<_> = graph
            .final_outputs()
            .iter()
            .map(|a| a.location.to_str().unwrap())
            .collect();
        assert_eq!(
            finals,
            vec!["round_0_mixed_unphased.vcf", "round_1_diploid.vcf.gz"]
        );
    }

    #[test]
    fn test_all_outputs_include_companion_indexes() {
        let graph = build(&make_settings(None));
        let outputs = graph.all_outputs();
        let locations: Vec<_> = outputs
            .iter()
            .map(|a| a.location.to_str().unwrap())
            .collect();
        assert!(locations.contains(&"round_0_mixed_tagged.bam.bai"));
        assert!(locations.contains(&"round_0_mixed_phased.vcf.gz.tbi"));
        assert!(locations.contains(&"round_1_diploid.vcf.gz.tbi"));
    }
}
