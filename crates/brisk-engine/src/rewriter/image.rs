//! Module image format
//!
//! The editable in-memory representation of one compiled module: header,
//! reference list, cross-module function references, the native entry-point
//! slot table, and per-function instruction streams. Call instructions use
//! fixed-width operands so rewriting a call preserves the code layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic number for Brisk module images: "BRSK"
pub const MAGIC: [u8; 4] = *b"BRSK";

/// Current image format version
pub const FORMAT_VERSION: u32 = 1;

/// Function flags
pub mod flags {
    /// The function has been selected for native compilation
    pub const NATIVE_COMPILED: u32 = 1 << 0;
}

/// Image encoding/decoding errors
#[derive(Debug, Error)]
pub enum ImageError {
    /// Invalid magic number
    #[error("invalid magic number: expected BRSK, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported format version
    #[error("unsupported image version: {0} (current: {FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the image
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Image ends mid-field
    #[error("unexpected end of image")]
    UnexpectedEof,

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// Unknown opcode byte in an instruction stream
    #[error("invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Instruction stream ends mid-operand
    #[error("truncated operand at offset {0}")]
    TruncatedOperand(usize),
}

/// Instruction set of the image's code section.
///
/// All opcodes are single-byte; call forms carry one 32-bit operand so a
/// managed call can be redirected in place.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,
    /// Push argument (operand: argument index)
    LoadArg = 0x01,
    /// Push constant (operand: constant slot)
    LoadConst = 0x02,
    /// Call through managed dispatch (operand: function-reference index)
    CallManaged = 0x10,
    /// Call a native entry point (operand: native slot index)
    CallNative = 0x11,
    /// Return to caller
    Return = 0x20,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Nop),
            0x01 => Some(Opcode::LoadArg),
            0x02 => Some(Opcode::LoadConst),
            0x10 => Some(Opcode::CallManaged),
            0x11 => Some(Opcode::CallNative),
            0x20 => Some(Opcode::Return),
            _ => None,
        }
    }

    /// Width in bytes of the operand following the opcode.
    pub fn operand_width(self) -> usize {
        match self {
            Opcode::Nop | Opcode::Return => 0,
            Opcode::LoadArg | Opcode::LoadConst | Opcode::CallManaged | Opcode::CallNative => 4,
        }
    }
}

/// Cross-module function reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncRef {
    /// Module the referenced function lives in
    pub module: String,
    /// Function name within that module
    pub function: String,
}

/// One entry in a module's function table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Encoded signature key (dispatch identity)
    pub signature: String,
    /// Function flags (see [`flags`])
    pub flags: u32,
    /// Instruction stream
    pub code: Vec<u8>,
}

impl FunctionDef {
    /// Whether the function was selected for native compilation.
    pub fn is_native_compiled(&self) -> bool {
        self.flags & flags::NATIVE_COMPILED != 0
    }
}

/// A decoded module image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    /// Module name
    pub name: String,
    /// Names of referenced modules
    pub references: Vec<String>,
    /// Cross-module call targets, indexed by `CallManaged` operands
    pub func_refs: Vec<FuncRef>,
    /// Encoded signatures of the native entry-point table, indexed by
    /// `CallNative` operands; bound to addresses at load time
    pub native_slots: Vec<String>,
    /// Function definitions
    pub functions: Vec<FunctionDef>,
}

impl ModuleImage {
    /// Empty image for a module.
    pub fn new(name: impl Into<String>) -> Self {
        ModuleImage {
            name: name.into(),
            references: Vec::new(),
            func_refs: Vec::new(),
            native_slots: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Whether the reference list names a module.
    pub fn references_module(&self, module: &str) -> bool {
        self.references.iter().any(|r| r == module)
    }

    /// Add a referenced module name.
    pub fn add_reference(&mut self, module: impl Into<String>) {
        self.references.push(module.into());
    }

    /// Add a cross-module function reference, returning its index.
    pub fn add_func_ref(&mut self, module: impl Into<String>, function: impl Into<String>) -> u32 {
        self.func_refs.push(FuncRef {
            module: module.into(),
            function: function.into(),
        });
        (self.func_refs.len() - 1) as u32
    }

    /// Intern an encoded signature in the native slot table, returning its slot.
    pub fn intern_native_slot(&mut self, signature: &str) -> u32 {
        if let Some(pos) = self.native_slots.iter().position(|s| s == signature) {
            return pos as u32;
        }
        self.native_slots.push(signature.to_string());
        (self.native_slots.len() - 1) as u32
    }

    /// Serialize to bytes, appending a crc32 checksum over the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ImageWriter::new();
        w.write_bytes(&MAGIC);
        w.write_u32(FORMAT_VERSION);
        w.write_str(&self.name);

        w.write_u32(self.references.len() as u32);
        for reference in &self.references {
            w.write_str(reference);
        }

        w.write_u32(self.func_refs.len() as u32);
        for func_ref in &self.func_refs {
            w.write_str(&func_ref.module);
            w.write_str(&func_ref.function);
        }

        w.write_u32(self.native_slots.len() as u32);
        for slot in &self.native_slots {
            w.write_str(slot);
        }

        w.write_u32(self.functions.len() as u32);
        for function in &self.functions {
            w.write_str(&function.name);
            w.write_str(&function.signature);
            w.write_u32(function.flags);
            w.write_u32(function.code.len() as u32);
            w.write_bytes(&function.code);
        }

        let checksum = crc32fast::hash(&w.buf);
        w.write_u32(checksum);
        w.buf
    }

    /// Decode an image, verifying magic, version, and checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < 4 {
            return Err(ImageError::UnexpectedEof);
        }
        let payload = &bytes[..bytes.len() - 4];
        let stored = u32::from_le_bytes(
            bytes[bytes.len() - 4..]
                .try_into()
                .map_err(|_| ImageError::UnexpectedEof)?,
        );
        let actual = crc32fast::hash(payload);
        if stored != actual {
            return Err(ImageError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let mut r = ImageReader::new(payload);
        let magic: [u8; 4] = r.read_exact(4)?.try_into().unwrap();
        if magic != MAGIC {
            return Err(ImageError::InvalidMagic(magic));
        }
        let version = r.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let name = r.read_str()?;

        let reference_count = r.read_u32()? as usize;
        let mut references = Vec::with_capacity(reference_count);
        for _ in 0..reference_count {
            references.push(r.read_str()?);
        }

        let func_ref_count = r.read_u32()? as usize;
        let mut func_refs = Vec::with_capacity(func_ref_count);
        for _ in 0..func_ref_count {
            func_refs.push(FuncRef {
                module: r.read_str()?,
                function: r.read_str()?,
            });
        }

        let slot_count = r.read_u32()? as usize;
        let mut native_slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            native_slots.push(r.read_str()?);
        }

        let function_count = r.read_u32()? as usize;
        let mut functions = Vec::with_capacity(function_count);
        for _ in 0..function_count {
            let name = r.read_str()?;
            let signature = r.read_str()?;
            let flags = r.read_u32()?;
            let code_len = r.read_u32()? as usize;
            let code = r.read_exact(code_len)?.to_vec();
            functions.push(FunctionDef {
                name,
                signature,
                flags,
                code,
            });
        }

        Ok(ModuleImage {
            name,
            references,
            func_refs,
            native_slots,
            functions,
        })
    }
}

/// A call instruction located in a function's instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Index into the image's function table
    pub function_index: usize,
    /// Byte offset of the opcode within the function's code
    pub offset: usize,
    /// The call form found
    pub opcode: Opcode,
    /// The 32-bit operand (function-reference index or native slot)
    pub operand: u32,
}

/// Scan every instruction stream of an image and collect its call sites.
pub fn scan_call_sites(image: &ModuleImage) -> Result<Vec<CallSite>, ImageError> {
    let mut sites = Vec::new();
    for (function_index, function) in image.functions.iter().enumerate() {
        let code = &function.code;
        let mut offset = 0usize;
        while offset < code.len() {
            let byte = code[offset];
            let opcode =
                Opcode::from_byte(byte).ok_or(ImageError::InvalidOpcode(byte, offset))?;
            let width = opcode.operand_width();
            if offset + 1 + width > code.len() {
                return Err(ImageError::TruncatedOperand(offset));
            }
            if matches!(opcode, Opcode::CallManaged | Opcode::CallNative) {
                let operand =
                    u32::from_le_bytes(code[offset + 1..offset + 5].try_into().unwrap());
                sites.push(CallSite {
                    function_index,
                    offset,
                    opcode,
                    operand,
                });
            }
            offset += 1 + width;
        }
    }
    Ok(sites)
}

/// Debug-symbol sidecar, regenerated whenever an image is reserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSymbols {
    /// Module the symbols describe
    pub module: String,
    /// Per-function symbol records, in function-table order
    pub functions: Vec<FunctionSymbols>,
}

/// Debug record for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbols {
    /// Function name
    pub name: String,
    /// Size of the instruction stream in bytes
    pub code_size: u32,
    /// Byte offsets of every instruction, for stepping and stack traces
    pub instruction_offsets: Vec<u32>,
}

impl DebugSymbols {
    /// Regenerate symbols by walking an image's instruction streams.
    pub fn generate(image: &ModuleImage) -> Result<Self, ImageError> {
        let mut functions = Vec::with_capacity(image.functions.len());
        for function in &image.functions {
            let mut instruction_offsets = Vec::new();
            let code = &function.code;
            let mut offset = 0usize;
            while offset < code.len() {
                let byte = code[offset];
                let opcode =
                    Opcode::from_byte(byte).ok_or(ImageError::InvalidOpcode(byte, offset))?;
                if offset + 1 + opcode.operand_width() > code.len() {
                    return Err(ImageError::TruncatedOperand(offset));
                }
                instruction_offsets.push(offset as u32);
                offset += 1 + opcode.operand_width();
            }
            functions.push(FunctionSymbols {
                name: function.name.clone(),
                code_size: code.len() as u32,
                instruction_offsets,
            });
        }
        Ok(DebugSymbols {
            module: image.name.clone(),
            functions,
        })
    }

    /// Serialize to the on-disk sidecar form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a sidecar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

struct ImageWriter {
    buf: Vec<u8>,
}

impl ImageWriter {
    fn new() -> Self {
        ImageWriter { buf: Vec::new() }
    }

    fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

struct ImageReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ImageReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ImageReader { bytes, pos: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        if self.pos + len > self.bytes.len() {
            return Err(ImageError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, ImageError> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_str(&mut self) -> Result<String, ImageError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ImageError::InvalidUtf8)
    }
}
