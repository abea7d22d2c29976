use super::{decode, encode};
use anyhow::{bail, ensure, Context, Result};
use ethabi::param_type::Writer;
use ethabi::{ParamType, Token};
use std::fmt;

/// A contract function: name plus input and output parameter lists.
#[derive(Debug, Clone, PartialEq)]
pub struct AbiFunction {
    name: String,
    inputs: Vec<ParamType>,
    outputs: Vec<ParamType>,
}

impl AbiFunction {
    pub fn new(name: impl Into<String>, inputs: Vec<ParamType>, outputs: Vec<ParamType>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[ParamType] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ParamType] {
        &self.outputs
    }

    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(Writer::write).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        ethabi::short_signature(&self.name, &self.inputs)
    }

    pub fn encode_call(&self, args: &[Token]) -> Result<Vec<u8>> {
        ensure!(
            args.len() == self.inputs.len(),
            "{} expects {} arguments, got {}",
            self.signature(),
            self.inputs.len(),
            args.len()
        );
        if let Some(idx) = args
            .iter()
            .zip(&self.inputs)
            .position(|(arg, kind)| !arg.type_check(kind))
        {
            bail!(
                "argument {idx} of {} does not match {}",
                self.signature(),
                Writer::write(&self.inputs[idx])
            );
        }

        let mut data = self.selector().to_vec();
        data.extend(encode(args));
        Ok(data)
    }

    /// Decodes call data produced by [`AbiFunction::encode_call`].
    pub fn decode_call(&self, data: &[u8]) -> Result<Vec<Token>> {
        ensure!(data.len() >= 4, "call data shorter than a selector");
        ensure!(
            data[..4] == self.selector(),
            "call data selector does not match {}",
            self.signature()
        );
        decode(&self.inputs, &data[4..])
            .with_context(|| format!("failed to decode arguments of {}", self.signature()))
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>> {
        if data.is_empty() && !self.outputs.is_empty() {
            bail!(
                "{} returned no data; is a contract deployed at the target address?",
                self.signature()
            );
        }
        decode(&self.outputs, data)
            .with_context(|| format!("failed to decode return data of {}", self.signature()))
    }
}

impl fmt::Display for AbiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}
