//! Binary image format for persisted prototypes.
//!
//! No wire compatibility is promised beyond what this VM itself produces
//! and consumes.

use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::prototype::{Constant, ProtoRegistry, Prototype, UpvalueDesc};

const IMAGE_MAGIC: &[u8; 8] = b"MONDIMG\0";
const IMAGE_VERSION: u32 = 1;

const TAG_NUMBER: u8 = 0;
const TAG_STR: u8 = 1;

/// Write every prototype of the registry, in id order.
pub fn save_image<W: Write>(registry: &ProtoRegistry, mut writer: W) -> io::Result<()> {
    writer.write_all(IMAGE_MAGIC)?;
    write_u32(&mut writer, IMAGE_VERSION)?;
    write_u32(&mut writer, registry.len() as u32)?;

    for proto in registry.iter() {
        write_u16(&mut writer, proto.params)?;
        write_u16(&mut writer, proto.hook_max)?;

        write_u16(&mut writer, proto.constants.len() as u16)?;
        for constant in &proto.constants {
            match constant {
                Constant::Number(n) => {
                    write_u8(&mut writer, TAG_NUMBER)?;
                    writer.write_all(&n.to_le_bytes())?;
                }
                Constant::Str(s) => {
                    write_u8(&mut writer, TAG_STR)?;
                    write_u32(&mut writer, s.len() as u32)?;
                    writer.write_all(s.as_bytes())?;
                }
            }
        }

        write_u16(&mut writer, proto.upvalues.len() as u16)?;
        for desc in &proto.upvalues {
            write_u32(&mut writer, desc.owner)?;
            write_u16(&mut writer, desc.slot)?;
            write_u16(&mut writer, desc.hook)?;
        }

        write_u32(&mut writer, proto.code.len() as u32)?;
        writer.write_all(&proto.code)?;
    }

    writer.flush()
}

/// Read a registry back; prototype ids are their positions in the image.
pub fn load_image<R: Read>(mut reader: R) -> io::Result<ProtoRegistry> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != IMAGE_MAGIC {
        return Err(invalid_data("invalid image magic"));
    }

    let version = read_u32(&mut reader)?;
    if version != IMAGE_VERSION {
        return Err(invalid_data("unsupported image version"));
    }

    let count = read_u32(&mut reader)?;
    let mut protos = Vec::with_capacity(count as usize);

    for id in 0..count {
        let params = read_u16(&mut reader)?;
        let hook_max = read_u16(&mut reader)?;

        let const_count = read_u16(&mut reader)?;
        let mut constants = Vec::with_capacity(const_count as usize);
        for _ in 0..const_count {
            match read_u8(&mut reader)? {
                TAG_NUMBER => {
                    let mut bytes = [0u8; 8];
                    reader.read_exact(&mut bytes)?;
                    constants.push(Constant::Number(f64::from_le_bytes(bytes)));
                }
                TAG_STR => {
                    let len = read_u32(&mut reader)? as usize;
                    let mut bytes = vec![0u8; len];
                    reader.read_exact(&mut bytes)?;
                    let s = String::from_utf8(bytes)
                        .map_err(|_| invalid_data("constant is not valid utf-8"))?;
                    constants.push(Constant::Str(s));
                }
                tag => return Err(invalid_data(&format!("unknown constant tag {tag}"))),
            }
        }

        let upval_count = read_u16(&mut reader)?;
        let mut upvalues = Vec::with_capacity(upval_count as usize);
        for _ in 0..upval_count {
            let owner = read_u32(&mut reader)?;
            let slot = read_u16(&mut reader)?;
            let hook = read_u16(&mut reader)?;
            upvalues.push(UpvalueDesc { owner, slot, hook });
        }

        let code_len = read_u32(&mut reader)? as usize;
        let mut code = vec![0u8; code_len];
        reader.read_exact(&mut code)?;

        protos.push(Rc::new(Prototype {
            id,
            params,
            hook_max,
            constants,
            upvalues,
            code,
        }));
    }

    Ok(ProtoRegistry::from_protos(protos))
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn write_u8<W: Write>(writer: &mut W, v: u8) -> io::Result<()> {
    writer.write_all(&[v])
}

fn write_u16<W: Write>(writer: &mut W, v: u16) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

fn write_u32<W: Write>(writer: &mut W, v: u32) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut bytes = [0u8; 1];
    reader.read_exact(&mut bytes)?;
    Ok(bytes[0])
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::Assembler;

    fn sample_registry() -> ProtoRegistry {
        let mut asm = Assembler::new();
        let outer = asm.begin_function();
        asm.set_params(2);
        asm.set_hook_max(1);
        asm.begin_function();
        asm.add_upvalue(UpvalueDesc {
            owner: outer,
            slot: 0,
            hook: 0,
        });
        let idx = asm.add_constant(Constant::Str("inner".into()));
        asm.code().load_constant(idx);
        asm.code().return_(1);
        let inner = asm.end_function();
        asm.add_constant(Constant::Number(300.0));
        asm.code().make_closure(inner as u16);
        asm.code().return_(1);
        asm.end_function();
        asm.finish()
    }

    #[test]
    fn round_trip() {
        let registry = sample_registry();
        let mut bytes = Vec::new();
        save_image(&registry, &mut bytes).unwrap();

        let loaded = load_image(bytes.as_slice()).unwrap();
        assert_eq!(loaded.len(), registry.len());
        for (a, b) in registry.iter().zip(loaded.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.params, b.params);
            assert_eq!(a.hook_max, b.hook_max);
            assert_eq!(a.constants.len(), b.constants.len());
            assert_eq!(a.upvalues, b.upvalues);
            assert_eq!(a.code, b.code);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let err = load_image(&b"NOTANIMG________"[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = Vec::new();
        save_image(&ProtoRegistry::default(), &mut bytes).unwrap();
        bytes[8] = 99;
        let err = load_image(bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_truncated_stream() {
        let registry = sample_registry();
        let mut bytes = Vec::new();
        save_image(&registry, &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(load_image(bytes.as_slice()).is_err());
    }
}
