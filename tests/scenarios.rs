//! Integration tests against the public `parse_file` entry point, one per
//! testable property: promotion, missing fidelity, quoted escapes, pool
//! bijection, BOM handling, and thread invariance.

use std::io::Write;

use csvtape::{AnyValue, BaseType, OptionsBuilder, PoolThreshold, Source, ThreadingMode};

#[test]
fn int_column_promotes_to_float_across_rows() {
    let opts = OptionsBuilder::new().build();
    let bytes = b"a,b,c\n1,2.0,x\n3,4,y\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    let names: Vec<&str> = file.names().collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    let types: Vec<BaseType> = file.types().map(|t| t.base()).collect();
    assert_eq!(types, vec![BaseType::Int, BaseType::Float, BaseType::String]);

    assert_eq!(file.get(0, 0), Some(AnyValue::Int(1)));
    assert_eq!(file.get(0, 1), Some(AnyValue::Int(3)));
    assert_eq!(file.get(1, 0), Some(AnyValue::Float(2.0)));
    assert_eq!(file.get(1, 1), Some(AnyValue::Float(4.0)));
    assert_eq!(file.get(2, 0), Some(AnyValue::Str("x".into())));
    assert_eq!(file.get(2, 1), Some(AnyValue::Str("y".into())));
}

#[test]
fn missing_sentinel_reads_as_missing_without_corrupting_siblings() {
    let opts = OptionsBuilder::new().build();
    let bytes = b"a,b\n1,hi\n,\n3,bye\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    assert_eq!(file.rows(), 3);
    assert_eq!(file.get(0, 0), Some(AnyValue::Int(1)));
    assert_eq!(file.get(1, 0), Some(AnyValue::Str("hi".into())));
    assert_eq!(file.get(0, 1), Some(AnyValue::Missing));
    assert_eq!(file.get(1, 1), Some(AnyValue::Missing));
    assert_eq!(file.get(0, 2), Some(AnyValue::Int(3)));
    assert_eq!(file.get(1, 2), Some(AnyValue::Str("bye".into())));

    let a_type = file.column(0).unwrap().type_code();
    let b_type = file.column(1).unwrap().type_code();
    assert!(a_type.is_missing());
    assert!(b_type.is_missing());
}

#[test]
fn doubled_quote_escape_round_trips_to_an_unescaped_string() {
    let opts = OptionsBuilder::new().build();
    let bytes = b"a\n\"he said \"\"hi\"\"\"\nok\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    assert_eq!(file.column(0).unwrap().type_code().base(), BaseType::String);
    assert_eq!(file.get(0, 0), Some(AnyValue::Str("he said \"hi\"".into())));
    assert_eq!(file.get(0, 1), Some(AnyValue::Str("ok".into())));
}

#[test]
fn backslash_escape_byte_unescapes_in_the_materialized_string() {
    let opts = OptionsBuilder::new().escape_byte(b'\\').build();
    let bytes = b"a\n\"he said \\\"hi\\\"\"\nok\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();
    assert_eq!(file.get(0, 0), Some(AnyValue::Str("he said \"hi\"".into())));
    assert_eq!(file.get(0, 1), Some(AnyValue::Str("ok".into())));
}

#[test]
fn pool_threshold_one_interns_a_repeated_string_column() {
    let opts = OptionsBuilder::new().pool(PoolThreshold::Fraction(1.0)).build();
    let bytes = b"a,b\nx,hello\nx,hello\nx,hello\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    assert_eq!(file.column(0).unwrap().type_code().base(), BaseType::Pool);
    assert_eq!(file.column(1).unwrap().type_code().base(), BaseType::Pool);
    for row in 0..3 {
        assert_eq!(file.get(0, row), Some(AnyValue::PooledStr("x")));
        assert_eq!(file.get(1, row), Some(AnyValue::PooledStr("hello")));
    }
}

#[test]
fn leading_bom_is_consumed_before_header_detection() {
    let opts = OptionsBuilder::new().build();
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend_from_slice(b"a,b\n1,2\n");
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    let names: Vec<&str> = file.names().collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(file.get(0, 0), Some(AnyValue::Int(1)));
    assert_eq!(file.get(1, 0), Some(AnyValue::Int(2)));
}

#[test]
fn thread_count_does_not_change_the_parsed_result() {
    let mut body = String::from("id,label,value\n");
    let labels = ["red", "green", "blue", "yellow", "purple"];
    for i in 0..5_000 {
        body.push_str(&format!("{i},{},{}\n", labels[i % labels.len()], i as f64 * 0.5));
    }

    let seq_opts = OptionsBuilder::new().threaded(ThreadingMode::Never).build();
    let par_opts = OptionsBuilder::new()
        .threaded(ThreadingMode::Always)
        .n_threads(4)
        .build();

    let seq = csvtape::parse_file(Source::Bytes(body.clone().into_bytes()), seq_opts).unwrap();
    let par = csvtape::parse_file(Source::Bytes(body.into_bytes()), par_opts).unwrap();

    assert_eq!(seq.rows(), par.rows());
    assert_eq!(
        seq.types().map(|t| t.base()).collect::<Vec<_>>(),
        par.types().map(|t| t.base()).collect::<Vec<_>>()
    );
    for row in 0..seq.rows() {
        for col in 0..seq.cols() {
            assert_eq!(seq.get(col, row), par.get(col, row), "row {row} col {col} diverged");
        }
    }
}

#[test]
fn row_limit_is_global_even_when_forced_parallel() {
    let mut body = String::from("a,b\n");
    for i in 0..2_000 {
        body.push_str(&format!("{i},{}\n", i * 2));
    }
    let opts = OptionsBuilder::new()
        .threaded(ThreadingMode::Always)
        .n_threads(4)
        .limit(10)
        .build();
    let file = csvtape::parse_file(Source::Bytes(body.into_bytes()), opts).unwrap();
    assert_eq!(file.rows(), 10);
}

#[test]
fn row_shape_mismatch_fills_missing_and_discards_extras() {
    let opts = OptionsBuilder::new().silence_warnings(true).build();
    let bytes = b"a,b,c\n1,2,3\n4,5\n6,7,8,9\n".to_vec();
    let file = csvtape::parse_file(Source::Bytes(bytes), opts).unwrap();

    assert_eq!(file.rows(), 3);
    assert_eq!(file.cols(), 3);
    assert_eq!(file.get(2, 1), Some(AnyValue::Missing));
    assert_eq!(file.get(0, 2), Some(AnyValue::Int(6)));
    assert_eq!(file.get(1, 2), Some(AnyValue::Int(7)));
    assert_eq!(file.get(2, 2), Some(AnyValue::Int(8)));
}

#[test]
fn parsing_from_a_real_file_path_matches_parsing_from_bytes() {
    let bytes = b"a,b\n1,x\n2,y\n3,z\n";
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();

    let from_path = csvtape::parse_file(Source::Path(tmp.path()), OptionsBuilder::new().build()).unwrap();
    let from_bytes = csvtape::parse_file(Source::Bytes(bytes.to_vec()), OptionsBuilder::new().build()).unwrap();

    assert_eq!(from_path.rows(), from_bytes.rows());
    for row in 0..from_path.rows() {
        for col in 0..from_path.cols() {
            assert_eq!(from_path.get(col, row), from_bytes.get(col, row));
        }
    }
}
