//! 参数规范化摘要
//!
//! 将任意参数映射序列化为键序无关的规范 JSON 字节序列，再做 SHA-256，
//! 输出 64 位小写十六进制。缺省参数与空对象视为同一「无参数」情形。

use serde_json::Value;
use sha2::{Digest, Sha256};

/// 计算参数映射的规范摘要
///
/// - 键值对相同的映射，无论插入顺序，摘要相同
/// - `None`、`Null` 与空对象摘要相同
/// - 任意键或值的差异都会改变摘要
///
/// 对合法 JSON 值永不失败。
pub fn args_digest(args: Option<&Value>) -> String {
    let canonical = match args {
        Some(Value::Null) | None => "{}".to_string(),
        Some(v) => canonical_json(v),
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 规范 JSON 文本：对象键按字典序递归排序，标量用 serde_json 的标准文本形式
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display 即 JSON 序列化（含转义），不会失败
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
