//! Definitions installed into every session after the builtins, written
//! in the language itself.

/// `caar` through `cddddr`. A run of `d`s ending in `a` reads as one
/// `list-ref`, so `caddr` is `(list-ref x 2)`.
pub fn cxr_source() -> String {
    let mut defs = Vec::new();
    for depth in 2..=4 {
        for combo in 0..(1u32 << depth) {
            let letters: String = (0..depth)
                .rev()
                .map(|bit| if combo >> bit & 1 == 0 { 'a' } else { 'd' })
                .collect();
            let steps = letters
                .replace("addd", "3")
                .replace("add", "2")
                .replace("ad", "1");
            defs.push(format!("(ref (c{letters}r x) {})", accessor(&steps)));
        }
    }
    defs.join("\n")
}

fn accessor(steps: &str) -> String {
    let mut chars = steps.chars();
    match chars.next() {
        None => "x".to_string(),
        Some(n) if n.is_ascii_digit() => format!("(list-ref {} {n})", accessor(chars.as_str())),
        Some(c) => format!("(c{c}r {})", accessor(chars.as_str())),
    }
}

pub const MACROS: &str = r#"
(macro case-lambda args
  `(lambda =>
     (apply (case (length =>)
              ,@(map (lambda (=>) `((,(length (car =>)))
                                    (lambda ,@=>)))
                     args))
            =>)))

(macro ref@ args
  (ref n (length args))
  (ref n_1 (- n 1))
  (ref syms (take n_1 args))
  (ref s (list-ref args n_1))
  (ref ls (gensym))
  (ref defs (let loop ((i 0) (r '()))
              (if (equal? i n_1) r
                  (loop (+ 1 i)
                        (cons `(ref ,(list-ref syms i) (list-ref ,ls ,i)) r)))))
  `(seq (ref ,ls ,s) ,@defs))

(macro define-record-type (name constructor pred . accessors)
  (ref (getter x i)
    `(ref (,(cadr x) v) (record-get v ,i)))
  (ref getter-defs
    (let loop ((d accessors) (r '()) (i 0))
      (if (null? d) r
          (loop (cdr d) (cons (getter (car d) i) r) (+ i 1)))))
  (ref (setter x i)
    (if (eq? (length x) 2) #f
        `(ref (,(caddr x) v y) (record-set! v ,i y))))
  (ref setter-defs
    (let loop ((d accessors) (r '()) (i 0))
      (if (null? d) r
          (let ((e (setter (car d) i)))
            (loop (cdr d) (if e (cons e r) r) (+ i 1))))))
  (ref c-args (cdr constructor))
  `(seq
     (ref ,constructor (make-record ',name @`,(list ,@c-args)))
     (ref (,pred v) (record? v ',name))
     ,@getter-defs
     ,@setter-defs))

(macro class procs
  (ref (gen-case proc)
    `((',proc) ,proc))
  `(lambda (cmd . args)
     (apply
       (case cmd
         ,@(map gen-case procs)
         (else => error))
       args)))

(macro local args
  (cons 'seq (map (lambda (n) `(define ,n ,n)) args)))
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cxr_source_covers_two_to_four_levels() {
        let source = cxr_source();
        assert_eq!(source.lines().count(), 4 + 8 + 16);
        assert!(source.contains("(ref (cadr x) (list-ref x 1))"));
        assert!(source.contains("(ref (caddr x) (list-ref x 2))"));
        assert!(source.contains("(ref (cadddr x) (list-ref x 3))"));
        assert!(source.contains("(ref (cdadr x) (cdr (list-ref x 1)))"));
        assert!(source.contains("(ref (cddddr x) (cdr (cdr (cdr (cdr x)))))"));
        assert!(source.contains("(ref (caar x) (car (car x)))"));
    }
}
