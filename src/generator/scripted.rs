//! Deterministic `ContentGenerator` for tests.

use super::types::{ContentGenerator, Fragment, FragmentStream, GenerationError, ReferenceImage};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum Step {
    Emit(Fragment),
    Fail,
    Stall,
}

pub fn text(value: &str) -> Step {
    Step::Emit(Fragment::Text(value.to_string()))
}

pub fn png(data: &[u8]) -> Step {
    Step::Emit(Fragment::InlineBinary {
        mime_type: "image/png".to_string(),
        data: data.to_vec(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub prompt: String,
    pub reference: Option<ReferenceImage>,
}

/// Plays queued scripts in call order, then repeats the fallback script.
pub struct ScriptedGenerator {
    queued: Mutex<VecDeque<Vec<Step>>>,
    fallback: Vec<Step>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGenerator {
    pub fn repeating(script: Vec<Step>) -> Self {
        Self::sequence(Vec::new(), script)
    }

    pub fn sequence(scripts: Vec<Vec<Step>>, fallback: Vec<Step>) -> Self {
        Self {
            queued: Mutex::new(scripts.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn stream(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<FragmentStream, GenerationError> {
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            reference: reference.cloned(),
        });
        let script = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let mut items = Vec::new();
        let mut stall = false;
        for step in script {
            match step {
                Step::Emit(fragment) => items.push(Ok(fragment)),
                Step::Fail => {
                    items.push(Err(GenerationError::MalformedStream(
                        "connection reset".to_string(),
                    )));
                    break;
                }
                Step::Stall => {
                    stall = true;
                    break;
                }
            }
        }

        let head = stream::iter(items);
        if stall {
            Ok(head.chain(stream::pending()).boxed())
        } else {
            Ok(head.boxed())
        }
    }
}
