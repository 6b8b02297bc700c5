// Shared fixtures for pipeline and injection tests
//
// In-process stand-ins for the external tools: the "archive" produced by
// the fake content tool is the descriptor text, and the fake backend's
// archive is the JSON of every written unit.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use covprobe::capabilities::DESCRIPTOR_FILE;
use covprobe::hook::{hook_declaration, DEFAULT_HOOK_CLASS, DEFAULT_HOOK_METHOD};
use covprobe::ir::{CodeUnit, IdentitySource, Method, MethodBody, Op, Type, Value};
use covprobe::pipeline::Stage;
use covprobe::registry::CodeRegistry;
use covprobe::toolchain::{CodeBackend, CodeSigner, ContentTool};
use covprobe::{InstrumentError, Result};

pub fn descriptor(package: &str, permissions: &[&str]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<manifest xmlns:android=\"http://schemas.android.com/apk/res/android\" package=\"{}\">\n",
        package
    );
    for p in permissions {
        xml.push_str(&format!("    <uses-permission android:name=\"{}\"/>\n", p));
    }
    xml.push_str("    <application android:label=\"App\"/>\n</manifest>\n");
    xml
}

/// `r0 := @this`, then `ordinary` plain statements, the last one a return
pub fn body(owner: &str, ordinary: usize) -> MethodBody {
    let mut body = MethodBody::new();
    body.push(Op::Identity {
        local: "r0".to_string(),
        source: IdentitySource::This {
            ty: Type::Object(owner.to_string()),
        },
    });
    for i in 1..ordinary {
        body.push(Op::Plain {
            text: format!("$i{} = {}", i, i),
        });
    }
    if ordinary > 0 {
        body.push(Op::Return { value: None });
    }
    body
}

pub fn unit(name: &str, ordinary: usize) -> CodeUnit {
    CodeUnit::new(name).with_method(
        Method::new("onCreate", vec![], Type::Void).with_body(body(name, ordinary)),
    )
}

/// A method with a parameter binding, a branch and an exception handler
pub fn branchy_unit(name: &str) -> CodeUnit {
    let mut body = MethodBody::new();
    body.push(Op::Identity {
        local: "r0".to_string(),
        source: IdentitySource::This {
            ty: Type::Object(name.to_string()),
        },
    });
    body.push(Op::Identity {
        local: "i0".to_string(),
        source: IdentitySource::Parameter {
            index: 0,
            ty: Type::Int,
        },
    });
    let begin = body.push(Op::Plain {
        text: "$i1 = i0 * 2".to_string(),
    });
    let target = body.push(Op::Return {
        value: Some(Value::Local("$i1".to_string())),
    });
    let handler = body.push(Op::Identity {
        local: "$r2".to_string(),
        source: IdentitySource::CaughtException,
    });
    body.push(Op::Throw {
        value: Value::Local("$r2".to_string()),
    });
    body.add_trap("java.lang.Exception", begin, target, handler);

    let mut looping = MethodBody::new();
    let head = looping.push(Op::Plain {
        text: "$i0 = 0".to_string(),
    });
    looping.push(Op::If {
        condition: "$i0 > 10".to_string(),
        target: head,
    });
    looping.push(Op::Goto { target: head });

    CodeUnit::new(name)
        .with_method(Method::new("twice", vec![Type::Int], Type::Int).with_body(body))
        .with_method(Method::new("spin", vec![], Type::Void).with_body(looping))
}

pub fn registry_with(units: Vec<CodeUnit>) -> CodeRegistry {
    let mut registry = CodeRegistry::new();
    registry.add_support_unit(hook_declaration(DEFAULT_HOOK_CLASS, DEFAULT_HOOK_METHOD));
    for unit in units {
        registry.add_unit(unit);
    }
    registry
}

fn io(context: &str, e: std::io::Error) -> InstrumentError {
    InstrumentError::io(context.to_string(), e)
}

/// Extracts a fixed descriptor; builds an archive holding the descriptor text
#[derive(Clone)]
pub struct FakeContentTool {
    pub descriptor: String,
    pub extractions: Rc<Cell<usize>>,
    pub built: Rc<RefCell<Vec<String>>>,
}

impl FakeContentTool {
    pub fn new(descriptor: String) -> Self {
        Self {
            descriptor,
            extractions: Rc::new(Cell::new(0)),
            built: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl ContentTool for FakeContentTool {
    fn extract(&self, _archive: &Path, content_dir: &Path) -> Result<()> {
        self.extractions.set(self.extractions.get() + 1);
        fs::create_dir_all(content_dir).map_err(|e| io("create content", e))?;
        fs::write(content_dir.join(DESCRIPTOR_FILE), &self.descriptor)
            .map_err(|e| io("write descriptor", e))
    }

    fn build(&self, content_dir: &Path, out_archive: &Path) -> Result<()> {
        let xml = fs::read_to_string(content_dir.join(DESCRIPTOR_FILE))
            .map_err(|e| io("read descriptor", e))?;
        fs::write(out_archive, &xml).map_err(|e| io("write archive", e))?;
        self.built.borrow_mut().push(xml);
        Ok(())
    }
}

/// Serves fixed units and keeps a copy of everything written back
#[derive(Clone)]
pub struct FakeBackend {
    pub units: Vec<CodeUnit>,
    pub with_runtime: bool,
    pub written: Rc<RefCell<Vec<CodeUnit>>>,
}

impl FakeBackend {
    pub fn new(units: Vec<CodeUnit>) -> Self {
        Self {
            units,
            with_runtime: true,
            written: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl CodeBackend for FakeBackend {
    fn load(&self, _archive: &Path, _work_dir: &Path, registry: &mut CodeRegistry) -> Result<()> {
        for unit in &self.units {
            registry.add_unit(unit.clone());
        }
        if self.with_runtime {
            registry.add_support_unit(hook_declaration(DEFAULT_HOOK_CLASS, DEFAULT_HOOK_METHOD));
        }
        Ok(())
    }

    fn write(&self, registry: &CodeRegistry, original: &Path, work_dir: &Path) -> Result<PathBuf> {
        let out = work_dir.join("assembled.apk");
        let json = serde_json::to_string(registry.units())
            .map_err(|e| InstrumentError::Config(e.to_string()))?;
        fs::write(&out, json).map_err(|e| io("write assembled", e))?;
        assert!(original.exists());
        *self.written.borrow_mut() = registry.units().to_vec();
        Ok(out)
    }
}

/// Copies the archive to `-signed.apk`, or fails like a broken keystore
#[derive(Clone, Default)]
pub struct FakeSigner {
    pub fail: bool,
}

impl CodeSigner for FakeSigner {
    fn sign(&self, archive: &Path) -> Result<PathBuf> {
        if self.fail {
            return Err(InstrumentError::ExternalToolFailure {
                stage: Stage::Signing,
                artifact: archive.display().to_string(),
                tool: "fake-signer".to_string(),
                detail: "keystore was tampered with, or password was incorrect".to_string(),
            });
        }
        let signed = archive.with_file_name("signed.apk");
        fs::copy(archive, &signed).map_err(|e| io("sign", e))?;
        Ok(signed)
    }
}

/// Create `<dir>/<name>` with some bytes, as the input archive
pub fn write_apk(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"PK\x03\x04").unwrap();
    path
}
