use std::rc::Rc;

use super::builtins::{self, BUILTINS};
use super::list;
use super::printer;
use super::runtime::{RunError, Vm};
use super::value::{Value, Var, var};

fn call(vm: &mut Vm, name: &str, args: Vec<Var>) -> Result<Var, RunError> {
    let (_, func) = BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .unwrap_or_else(|| panic!("no builtin {name}"));
    func(&args, vm)
}

fn int(n: i64) -> Var {
    var(Value::Integer(n))
}

fn ints(ns: &[i64]) -> Var {
    var(Value::list(ns.iter().map(|&n| int(n)).collect()))
}

fn show(vm: &Vm, value: &Var) -> String {
    printer::repr(value, &vm.names)
}

fn is_contiguous(value: &Var) -> bool {
    matches!(&*value.borrow(), Value::List(_) | Value::NonList(_))
}

mod value_tests {
    use super::*;

    #[test]
    fn empty_list_has_one_representation() {
        assert!(matches!(Value::list(Vec::new()), Value::Cons(None)));
        assert!(Value::empty_list().is_null());
        assert!(!Value::list(vec![int(1)]).is_null());
    }

    #[test]
    fn only_false_is_false() {
        assert!(Value::Boolean(false).is_false());
        assert!(!Value::Boolean(true).is_false());
        assert!(!Value::Integer(0).is_false());
        assert!(!Value::empty_list().is_false());
        assert!(!Value::Void.is_false());
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Integer(1).type_name(), "number");
        assert_eq!(Value::empty_list().type_name(), "cons");
        assert_eq!(Value::list(vec![int(1)]).type_name(), "list");
        assert_eq!(Value::NonList(vec![int(1), int(2)]).type_name(), "nonlist");
        assert_eq!(Value::string("s").type_name(), "string");
    }
}

mod list_tests {
    use super::*;

    #[test]
    fn list_to_cons_round_trip_keeps_element_cells() {
        let cell = ints(&[1, 2, 3]);
        let before = list::elements(&cell.borrow()).map(|(items, _)| items);

        let chain = list::ensure_cons(&cell).flatten();
        assert!(chain.is_some());
        assert!(!is_contiguous(&cell));

        let after = list::elements(&cell.borrow()).map(|(items, _)| items);
        let (before, after) = (before.unwrap_or_default(), after.unwrap_or_default());
        assert_eq!(before.len(), 3);
        assert!(before.iter().zip(&after).all(|(p, q)| Rc::ptr_eq(p, q)));
    }

    #[test]
    fn improper_list_round_trip_keeps_its_tail() {
        let cell = var(Value::NonList(vec![int(1), int(2), int(3)]));
        let tail = list::elements(&cell.borrow()).and_then(|(_, tail)| tail);
        list::ensure_cons(&cell);

        let (items, converted_tail) = list::elements(&cell.borrow()).unwrap_or_default();
        assert_eq!(items.len(), 2);
        match (tail, converted_tail) {
            (Some(p), Some(q)) => assert!(Rc::ptr_eq(&p, &q)),
            other => panic!("expected improper tails, got {other:?}"),
        }
    }

    #[test]
    fn assign_shares_one_chain() {
        let mut vm = Vm::new();
        let source = ints(&[1, 2]);
        let target = var(Value::Void);
        list::assign(&target, &source);

        call(&mut vm, "set-car!", vec![target.clone(), int(7)]).unwrap();
        assert_eq!(show(&vm, &source), "(7 2)");
        assert!(!Rc::ptr_eq(&source, &target));
    }

    #[test]
    fn equal_is_structural_across_representations() {
        let contiguous = ints(&[1, 2, 3]);
        let chained = ints(&[1, 2, 3]);
        list::ensure_cons(&chained);

        assert!(list::is_equal(&contiguous, &chained));
        assert!(list::is_equal(&chained, &contiguous));
        assert!(list::is_equal(&contiguous, &contiguous));
        assert!(!list::is_equal(&contiguous, &ints(&[1, 2])));

        let nested = var(Value::list(vec![ints(&[1]), var(Value::NonList(vec![int(2), int(3)]))]));
        let same = var(Value::list(vec![ints(&[1]), var(Value::NonList(vec![int(2), int(3)]))]));
        assert!(list::is_equal(&nested, &same));
    }

    #[test]
    fn proper_and_improper_lists_differ() {
        let proper = ints(&[1, 2]);
        let improper = var(Value::NonList(vec![int(1), int(2)]));
        assert!(!list::is_equal(&proper, &improper));
        assert!(!list::is_equal(&improper, &proper));
    }

    #[test]
    fn dicts_are_never_equal() {
        let mut vm = Vm::new();
        let pair = var(Value::NonList(vec![int(1), int(2)]));
        let dict = call(&mut vm, "alist->dict", vec![var(Value::list(vec![pair]))]).unwrap();

        assert!(!list::is_equal(&dict, &dict));
        assert!(list::is_eqv(&dict, &dict));
    }

    #[test]
    fn length_counts_proper_spine_only() {
        assert_eq!(list::length(&ints(&[1, 2, 3]).borrow()), Some(3));
        assert_eq!(list::length(&Value::empty_list()), Some(0));
        assert_eq!(list::length(&Value::Integer(3)), None);
    }
}

mod builtin_tests {
    use super::*;

    #[test]
    fn dup_of_unshared_cell_is_the_cell() {
        let mut vm = Vm::new();
        let args = vec![ints(&[1, 2])];
        let result = builtins::dup(&args, &mut vm).unwrap();
        assert!(Rc::ptr_eq(&result, &args[0]));
    }

    #[test]
    fn dup_of_shared_cell_is_fresh_but_equal() {
        let mut vm = Vm::new();
        let owner = ints(&[1, 2]);
        let args = vec![owner.clone()];
        let copy = builtins::dup(&args, &mut vm).unwrap();

        assert!(!Rc::ptr_eq(&copy, &owner));
        assert!(list::is_equal(&copy, &owner));

        call(&mut vm, "set!", vec![copy.clone(), int(5)]).unwrap();
        assert_eq!(show(&vm, &owner), "(1 2)");
    }

    #[test]
    fn dup_of_void_warns() {
        let mut vm = Vm::new();
        let owner = var(Value::Void);
        builtins::dup(&[owner.clone()], &mut vm).unwrap();
        assert_eq!(vm.take_warnings(), vec!["dup of void".to_string()]);
    }

    #[test]
    fn list_copy_is_equal_but_independent() {
        let mut vm = Vm::new();
        let original = ints(&[1, 2, 3]);
        let copy = call(&mut vm, "list-copy", vec![original.clone()]).unwrap();

        assert!(list::is_equal(&copy, &original));
        assert!(!Rc::ptr_eq(&copy, &original));

        call(&mut vm, "set-car!", vec![copy.clone(), int(9)]).unwrap();
        assert_eq!(show(&vm, &original), "(1 2 3)");
        assert_eq!(show(&vm, &copy), "(9 2 3)");
    }

    #[test]
    fn car_of_cons_is_the_same_cell() {
        let mut vm = Vm::new();
        let (a, b) = (int(1), int(2));
        let pair = call(&mut vm, "cons", vec![a.clone(), b.clone()]).unwrap();

        let car = call(&mut vm, "car", vec![pair.clone()]).unwrap();
        let cdr = call(&mut vm, "cdr", vec![pair.clone()]).unwrap();
        assert!(Rc::ptr_eq(&car, &a));
        assert!(Rc::ptr_eq(&cdr, &b));
        assert_eq!(show(&vm, &pair), "(1 . 2)");
    }

    #[test]
    fn cdr_of_cons_onto_a_list_is_that_list() {
        let mut vm = Vm::new();
        let tail = ints(&[2, 3]);
        let pair = call(&mut vm, "cons", vec![int(1), tail.clone()]).unwrap();
        let cdr = call(&mut vm, "cdr", vec![pair]).unwrap();

        assert!(list::is_eqv(&cdr, &tail));
        assert_eq!(show(&vm, &cdr), "(2 3)");
    }

    #[test]
    fn cdr_converts_to_cons_form() {
        let mut vm = Vm::new();
        let cell = ints(&[1, 2, 3]);
        let contiguous = call(&mut vm, "cont??", vec![cell.clone()]).unwrap();
        assert_eq!(show(&vm, &contiguous), "#t");

        call(&mut vm, "cdr", vec![cell.clone()]).unwrap();
        let contiguous = call(&mut vm, "cont??", vec![cell.clone()]).unwrap();
        assert_eq!(show(&vm, &contiguous), "#f");
    }

    #[test]
    fn set_car_through_a_tail_is_visible_from_the_head() {
        let mut vm = Vm::new();
        let x = ints(&[1, 2, 3]);
        let rest = call(&mut vm, "cdr", vec![x.clone()]).unwrap();
        call(&mut vm, "set-car!", vec![rest, int(99)]).unwrap();
        assert_eq!(show(&vm, &x), "(1 99 3)");
    }

    #[test]
    fn car_of_empty_list_is_an_error() {
        let mut vm = Vm::new();
        let error = call(&mut vm, "car", vec![var(Value::empty_list())]).unwrap_err();
        assert_eq!(error.message, "car on null");
    }

    #[test]
    fn arithmetic_overflow_is_an_error() {
        let mut vm = Vm::new();
        assert!(call(&mut vm, "+", vec![int(i64::MAX), int(1)]).is_err());
        assert!(call(&mut vm, "/", vec![int(1), int(0)]).is_err());
        let sum = call(&mut vm, "+", vec![int(1), int(2), int(3)]).unwrap();
        assert_eq!(show(&vm, &sum), "6");
    }

    #[test]
    fn dict_rejects_a_second_key_type() {
        let mut vm = Vm::new();
        let pair = var(Value::NonList(vec![int(1), int(2)]));
        let dict = call(&mut vm, "alist->dict", vec![var(Value::list(vec![pair]))]).unwrap();

        let found = call(&mut vm, "dict-get-default!", vec![dict.clone(), int(1), int(0)]).unwrap();
        assert_eq!(show(&vm, &found), "2");

        let stored = call(
            &mut vm,
            "dict-get-default!",
            vec![dict.clone(), int(5), int(0)],
        )
        .unwrap();
        assert_eq!(show(&vm, &stored), "0");

        let key = var(Value::string("k"));
        assert!(call(&mut vm, "dict-set!", vec![dict, key, int(1)]).is_err());
    }
}

mod printer_tests {
    use super::*;

    #[test]
    fn atoms() {
        let vm = Vm::new();
        assert_eq!(show(&vm, &var(Value::Void)), "#void");
        assert_eq!(show(&vm, &var(Value::Boolean(true))), "#t");
        assert_eq!(show(&vm, &var(Value::Eof)), "#~eof-object");
        assert_eq!(show(&vm, &var(Value::string("a\"b"))), "\"a\\\"b\"");
        assert_eq!(printer::display(&var(Value::string("a\"b")), &vm.names), "a\"b");
    }

    #[test]
    fn lists_in_every_representation() {
        let vm = Vm::new();
        let chained = ints(&[1, 2]);
        list::ensure_cons(&chained);
        let nested = var(Value::list(vec![ints(&[1]), var(Value::empty_list())]));

        assert_eq!(show(&vm, &ints(&[1, 2])), "(1 2)");
        assert_eq!(show(&vm, &chained), "(1 2)");
        assert_eq!(show(&vm, &nested), "((1) ())");
        assert_eq!(
            show(&vm, &var(Value::NonList(vec![int(1), int(2), int(3)]))),
            "(1 2 . 3)"
        );
        assert_eq!(show(&vm, &var(Value::Splice(vec![int(1), int(2)]))), "#@(1 2)");
    }
}
