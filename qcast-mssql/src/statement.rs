use qcast_core::{CallKind, OperationParam, ParamType, ParamValue, RemoteCall, RemoteError};
use tiberius::Query;

/// Render the T-SQL text for a call.
///
/// Procedures become `EXEC name @Named = @P1, @P2, ...`; bound values are
/// always placeholders, never inlined. Queries are sent as written and bind
/// to `@P1..@Pn` in order.
pub fn statement_text(call: &RemoteCall) -> Result<String, RemoteError> {
    match call.kind {
        CallKind::Query => Ok(call.text.clone()),
        CallKind::Procedure => {
            if !is_object_name(&call.text) {
                return Err(RemoteError::Rejected(format!("invalid procedure name: {}", call.text)));
            }

            let mut args = Vec::with_capacity(call.params.len());
            for (i, param) in call.params.iter().enumerate() {
                let placeholder = format!("@P{}", i + 1);
                match &param.name {
                    Some(name) if is_identifier(name) => args.push(format!("@{name} = {placeholder}")),
                    Some(name) => {
                        return Err(RemoteError::Rejected(format!("invalid parameter name: {name}")))
                    }
                    None => args.push(placeholder),
                }
            }

            if args.is_empty() {
                Ok(format!("EXEC {}", call.text))
            } else {
                Ok(format!("EXEC {} {}", call.text, args.join(", ")))
            }
        }
    }
}

/// Bind every parameter in order. The declared type decides how a value (or
/// a NULL) is sent.
pub fn bind_params<'a>(query: &mut Query<'a>, params: &'a [OperationParam]) {
    for param in params {
        match (&param.ty, &param.value) {
            (ParamType::VarChar(len), ParamValue::Text(s)) => query.bind(truncate(s, *len)),
            (ParamType::VarChar(_), ParamValue::Int(i)) => query.bind(i.to_string()),
            (ParamType::VarChar(_), ParamValue::Null) => query.bind(Option::<&str>::None),
            (ParamType::Int, ParamValue::Int(i)) => query.bind(*i),
            (ParamType::Int, ParamValue::Text(s)) => match s.trim().parse::<i32>() {
                Ok(i) => query.bind(i),
                Err(_) => query.bind(s.as_str()),
            },
            (ParamType::Int, ParamValue::Null) => query.bind(Option::<i32>::None),
        }
    }
}

fn truncate(s: &str, len: u16) -> &str {
    match s.char_indices().nth(usize::from(len)) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name`, `[schema].[name]`, `schema.name` and so on.
fn is_object_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let inner = part
                .strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .unwrap_or(part);
            is_identifier(inner)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_procedure_parameters() {
        let call = RemoteCall::procedure(
            "[dbo].[Sp_TB_QueOrderStatus]",
            vec![OperationParam::varchar("QueStatus", 50, "ALL"), OperationParam::int("ZoneID", 0)],
        );
        assert_eq!(
            statement_text(&call).unwrap(),
            "EXEC [dbo].[Sp_TB_QueOrderStatus] @QueStatus = @P1, @ZoneID = @P2"
        );
    }

    #[test]
    fn positional_procedure_parameters() {
        let call = RemoteCall::procedure(
            "[dbo].[Sp_TB_OrderKDS]",
            vec![
                OperationParam::positional_int(4),
                OperationParam::positional_int(0),
                OperationParam::positional_int(0),
            ],
        );
        assert_eq!(statement_text(&call).unwrap(), "EXEC [dbo].[Sp_TB_OrderKDS] @P1, @P2, @P3");
    }

    #[test]
    fn procedure_without_parameters() {
        let call = RemoteCall::procedure("dbo.Sp_Ping", Vec::new());
        assert_eq!(statement_text(&call).unwrap(), "EXEC dbo.Sp_Ping");
    }

    #[test]
    fn queries_pass_through() {
        let call = RemoteCall::query("SELECT 1 WHERE x = @P1", vec![OperationParam::varchar("x", 10, "a")]);
        assert_eq!(statement_text(&call).unwrap(), "SELECT 1 WHERE x = @P1");
    }

    #[test]
    fn injection_in_names_is_rejected() {
        let bad_proc = RemoteCall::procedure("[dbo].[Sp]; DROP TABLE x", Vec::new());
        assert!(matches!(statement_text(&bad_proc), Err(RemoteError::Rejected(_))));

        let bad_param = RemoteCall::procedure("[dbo].[Sp]", vec![OperationParam::int("a = 1; --", 1)]);
        assert!(matches!(statement_text(&bad_param), Err(RemoteError::Rejected(_))));
    }

    #[test]
    fn varchar_values_are_truncated_on_char_boundaries() {
        assert_eq!(truncate("ALL", 50), "ALL");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ก่อนหน้า", 2), "ก่");
    }
}
