//! Supported model catalog
//!
//! The external inference program accepts a fixed set of checkpoints. Ids
//! outside this set are rejected up front instead of being forwarded, since
//! the inference program only fails after minutes of model loading.

/// Stage-1 (semantic token) checkpoints
pub const STAGE1_MODELS: [&str; 6] = [
    "m-a-p/YuE-s1-7B-anneal-en-icl",
    "m-a-p/YuE-s1-7B-anneal-en-cot",
    "m-a-p/YuE-s1-7B-anneal-zh-icl",
    "m-a-p/YuE-s1-7B-anneal-zh-cot",
    "m-a-p/YuE-s1-7B-anneal-jp-kr-icl",
    "m-a-p/YuE-s1-7B-anneal-jp-kr-cot",
];

/// Stage-2 (acoustic refinement) checkpoints
pub const STAGE2_MODELS: [&str; 1] = ["m-a-p/YuE-s2-1B-general"];

/// Default stage-1 checkpoint
pub const DEFAULT_STAGE1_MODEL: &str = STAGE1_MODELS[0];

/// Default stage-2 checkpoint
pub const DEFAULT_STAGE2_MODEL: &str = STAGE2_MODELS[0];

pub fn is_supported_stage1(id: &str) -> bool {
    STAGE1_MODELS.contains(&id)
}

pub fn is_supported_stage2(id: &str) -> bool {
    STAGE2_MODELS.contains(&id)
}

/// In-context-learning variants are the only stage-1 models trained with
/// audio prompts. CoT variants accept the flags but ignore the reference.
pub fn supports_audio_prompt(stage1_id: &str) -> bool {
    stage1_id.ends_with("-icl")
}
